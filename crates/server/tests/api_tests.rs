//! Integration tests for the HTTP surface.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::TestServer;
use md5::Md5;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use stacks_core::config::AppConfig;

fn header<'a>(headers: &'a axum::http::HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .unwrap_or_else(|| panic!("missing header {name}"))
        .to_str()
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let server = TestServer::new().await;
    let (status, _, body) = server.get("/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["status"], "ok");
}

#[tokio::test]
async fn test_blob_read_miss_then_hit() {
    let server = TestServer::new().await;
    server.seed_blob("item1", 1, b"hello tape").await;

    // first read recalls from tape; the handler waits out the populate
    let (status, headers, body) = server.get("/item/item1/@blob/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header(&headers, "x-cached"), "0");
    assert_eq!(header(&headers, "etag"), "\"1\"");
    assert_eq!(&body[..], b"hello tape");

    // second read is a cache hit
    let (status, headers, body) = server.get("/item/item1/@blob/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header(&headers, "x-cached"), "1");
    assert_eq!(&body[..], b"hello tape");
}

#[tokio::test]
async fn test_head_reports_without_recalling() {
    let server = TestServer::new().await;
    server.seed_blob("item2", 1, b"0123456789").await;

    let (status, headers, body) = server.head("/item/item2/@blob/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header(&headers, "x-cached"), "0");
    assert_eq!(header(&headers, "content-length"), "10");
    assert!(body.is_empty());

    // nothing was pulled into the cache
    assert_eq!(server.state.cache.size(), 0);
}

#[tokio::test]
async fn test_blob_range_request() {
    let server = TestServer::new().await;
    server.seed_blob("item3", 1, b"hello tape").await;
    // warm the cache
    server.get("/item/item3/@blob/1").await;

    let request = Request::get("/item/item3/@blob/1")
        .header("range", "bytes=6-9")
        .body(Body::empty())
        .unwrap();
    let response = server.request(request).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get("content-range").unwrap(),
        "bytes 6-9/10"
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"tape");
}

#[tokio::test]
async fn test_blob_unsatisfiable_range() {
    let server = TestServer::new().await;
    server.seed_blob("item4", 1, b"abc").await;
    server.get("/item/item4/@blob/1").await;

    let request = Request::get("/item/item4/@blob/1")
        .header("range", "bytes=50-")
        .body(Body::empty())
        .unwrap();
    let response = server.request(request).await;
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        response.headers().get("content-range").unwrap(),
        "bytes */3"
    );
}

#[tokio::test]
async fn test_blob_not_found_and_bad_ref() {
    let server = TestServer::new().await;
    let (status, _, _) = server.get("/item/ghost/@blob/1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = server.get("/item/ghost/@blob/0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_blob_read_with_tape_disabled() {
    let server = TestServer::with_disabled_tape().await;
    let (status, _, _) = server.get("/item/item/@blob/1").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_oversized_blob_served_directly() {
    // test config caps the cache at 10_000 bytes; 2_000 >= 10_000/8
    let server = TestServer::new().await;
    let big = vec![9u8; 2_000];
    server.seed_blob("big", 1, &big).await;

    let (status, headers, body) = server.get("/item/big/@blob/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header(&headers, "x-cached"), "2");
    assert_eq!(body.len(), 2_000);
    assert_eq!(server.state.cache.size(), 0);
}

#[tokio::test]
async fn test_upload_append_read_roundtrip() {
    let server = TestServer::new().await;

    let (status, _, _) = server.post("/upload/file1", b"hello ").await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _, body) = server.post("/upload/file1", b"world").await;
    assert_eq!(status, StatusCode::CREATED);
    let meta: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(meta["Size"], 11);
    assert_eq!(meta["NextFragmentIndex"], 2);

    let (status, headers, body) = server.get("/upload/file1/content").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header(&headers, "content-length"), "11");
    assert_eq!(&body[..], b"hello world");
}

#[tokio::test]
async fn test_upload_checksum_header() {
    let server = TestServer::new().await;
    let chunk = b"checked chunk";
    let md5 = hex::encode(Md5::digest(chunk));

    let request = Request::post("/upload/file2")
        .header("x-upload-md5", md5.as_str())
        .body(Body::from(&chunk[..]))
        .unwrap();
    assert_eq!(server.request(request).await.status(), StatusCode::CREATED);

    // a corrupted chunk is refused before it is stored
    let request = Request::post("/upload/file2")
        .header("x-upload-md5", md5.as_str())
        .body(Body::from(&b"corrupted chunk"[..]))
        .unwrap();
    assert_eq!(
        server.request(request).await.status(),
        StatusCode::PRECONDITION_FAILED
    );

    let (_, _, body) = server.get("/upload/file2").await;
    let meta: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(meta["Fragments"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_upload_rollback() {
    let server = TestServer::new().await;
    server.post("/upload/file3", b"keep").await;
    server.post("/upload/file3", b"discard").await;

    assert_eq!(
        server.delete("/upload/file3/last").await,
        StatusCode::NO_CONTENT
    );
    let (_, _, body) = server.get("/upload/file3/content").await;
    assert_eq!(&body[..], b"keep");

    // a fresh append does not reuse the rolled-back index
    let (_, _, body) = server.post("/upload/file3", b"!").await;
    let meta: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(meta["NextFragmentIndex"], 3);
}

#[tokio::test]
async fn test_upload_labels_and_listing() {
    let server = TestServer::new().await;
    for id in ["a", "b", "c"] {
        server.post(&format!("/upload/{id}"), b"x").await;
    }
    server
        .put_json("/upload/a/labels", json!(["red", "round"]))
        .await;
    server.put_json("/upload/b/labels", json!(["red"])).await;

    let (status, _, body) = server.get("/uploads?label=red").await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<String> = serde_json::from_slice(&body).unwrap();
    assert_eq!(ids, vec!["a", "b"]);

    // repeated parameters intersect
    let (status, _, body) = server.get("/uploads?label=red&label=round").await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<String> = serde_json::from_slice(&body).unwrap();
    assert_eq!(ids, vec!["a"]);

    let (_, _, body) = server.get("/uploads?label=red&label=missing").await;
    let ids: Vec<String> = serde_json::from_slice(&body).unwrap();
    assert!(ids.is_empty());

    let (_, _, body) = server.get("/uploads").await;
    let ids: Vec<String> = serde_json::from_slice(&body).unwrap();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_upload_metadata_and_verify() {
    let server = TestServer::new().await;
    server.post("/upload/file4", b"verify me").await;

    let md5 = hex::encode(Md5::digest(b"verify me"));
    let sha256 = hex::encode(Sha256::digest(b"verify me"));
    let (status, _, body) = server
        .put_json(
            "/upload/file4/metadata",
            json!({
                "creator": "batch-ingest",
                "extra": "opaque client data",
                "md5": md5,
                "sha256": sha256,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let meta: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(meta["Creator"], "batch-ingest");
    assert_eq!(meta["Extra"], "opaque client data");

    let (status, _, body) = server.post("/upload/file4/verify", b"").await;
    assert_eq!(status, StatusCode::OK);
    let verdict: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(verdict["ok"], true);

    // break the recorded hash; verify notices
    server
        .put_json(
            "/upload/file4/metadata",
            json!({ "md5": hex::encode([0u8; 16]) }),
        )
        .await;
    let (_, _, body) = server.post("/upload/file4/verify", b"").await;
    let verdict: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(verdict["ok"], false);
}

#[tokio::test]
async fn test_upload_delete() {
    let server = TestServer::new().await;
    server.post("/upload/file5", b"bytes").await;

    assert_eq!(server.delete("/upload/file5").await, StatusCode::NO_CONTENT);
    let (status, _, _) = server.get("/upload/file5").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // deleting an unknown id is fine
    assert_eq!(server.delete("/upload/file5").await, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_upload_survives_restart() {
    let server = TestServer::new().await;
    server.post("/upload/file6", b"persisted").await;

    // simulate a restart: rebuild in-memory state from the backing store
    server.state.recover().await.unwrap();
    let (status, _, body) = server.get("/upload/file6/content").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"persisted");
}

#[tokio::test]
async fn test_bad_hash_hex_rejected() {
    let server = TestServer::new().await;
    server.post("/upload/file7", b"x").await;
    let (status, _, _) = server
        .put_json("/upload/file7/metadata", json!({ "md5": "not-hex" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cache_entries_expire_end_to_end() {
    let mut config = AppConfig::for_testing();
    config.cache.ttl_secs = 1;
    let server = TestServer::with_config(config).await;
    server.seed_blob("fleeting", 1, b"short-lived").await;

    server.get("/item/fleeting/@blob/1").await;
    let (_, headers, _) = server.get("/item/fleeting/@blob/1").await;
    assert_eq!(header(&headers, "x-cached"), "1");

    tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
    let (_, headers, _) = server.get("/item/fleeting/@blob/1").await;
    assert_eq!(header(&headers, "x-cached"), "0");
}
