//! Common test utilities.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use stacks_core::config::AppConfig;
use stacks_core::BlobRef;
use stacks_server::{AppState, BundleSource, DisabledSource, StoreSource};
use stacks_storage::{BlobStore, MemoryBackend};
use std::sync::Arc;
use tower::ServiceExt;

/// A test server wrapper with in-memory storage and a seedable tape.
/// Note: #[allow(dead_code)] because each test file compiles common/
/// separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub tape_store: Arc<dyn BlobStore>,
}

#[allow(dead_code)]
impl TestServer {
    /// Server over memory backends with the standard test config.
    pub async fn new() -> Self {
        Self::with_config(AppConfig::for_testing()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let tape_store: Arc<dyn BlobStore> = Arc::new(MemoryBackend::new());
        let tape: Arc<dyn BundleSource> = Arc::new(StoreSource::new(tape_store.clone()));
        Self::build(config, tape_store, tape).await
    }

    /// Server whose bundle store is administratively offline.
    pub async fn with_disabled_tape() -> Self {
        let tape_store: Arc<dyn BlobStore> = Arc::new(MemoryBackend::new());
        Self::build(
            AppConfig::for_testing(),
            tape_store,
            Arc::new(DisabledSource),
        )
        .await
    }

    async fn build(
        config: AppConfig,
        tape_store: Arc<dyn BlobStore>,
        tape: Arc<dyn BundleSource>,
    ) -> Self {
        let cache_store: Arc<dyn BlobStore> = Arc::new(MemoryBackend::new());
        let upload_store: Arc<dyn BlobStore> = Arc::new(MemoryBackend::new());
        let state = AppState::new(config, cache_store, upload_store, tape);
        state.recover().await.expect("recovery failed");
        let router = stacks_server::create_router(state.clone());
        Self {
            router,
            state,
            tape_store,
        }
    }

    /// Place a blob on the test tape.
    pub async fn seed_blob(&self, item: &str, n: u32, data: &[u8]) {
        let key = BlobRef::new(item, n).unwrap().cache_key();
        let mut w = self.tape_store.create(&key).await.unwrap();
        w.write(Bytes::copy_from_slice(data)).await.unwrap();
        w.finish().await.unwrap();
    }

    /// Issue one request against the router.
    pub async fn request(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, axum::http::HeaderMap, Bytes) {
        let response = self
            .request(Request::get(uri).body(Body::empty()).unwrap())
            .await;
        split(response).await
    }

    pub async fn head(&self, uri: &str) -> (StatusCode, axum::http::HeaderMap, Bytes) {
        let response = self
            .request(
                Request::builder()
                    .method("HEAD")
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        split(response).await
    }

    pub async fn post(&self, uri: &str, body: &[u8]) -> (StatusCode, axum::http::HeaderMap, Bytes) {
        let response = self
            .request(
                Request::post(uri)
                    .body(Body::from(Bytes::copy_from_slice(body)))
                    .unwrap(),
            )
            .await;
        split(response).await
    }

    pub async fn delete(&self, uri: &str) -> StatusCode {
        let response = self
            .request(
                Request::builder()
                    .method("DELETE")
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        response.status()
    }

    pub async fn put_json(
        &self,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, axum::http::HeaderMap, Bytes) {
        let response = self
            .request(
                Request::builder()
                    .method("PUT")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
            )
            .await;
        split(response).await
    }
}

async fn split(response: Response) -> (StatusCode, axum::http::HeaderMap, Bytes) {
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body)
}
