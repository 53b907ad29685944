//! HTTP request handlers.

pub mod blobs;
pub mod health;
pub mod uploads;

pub use blobs::get_blob;
pub use health::health_check;
pub use uploads::{
    append_fragment, delete_upload, get_upload, get_upload_content, list_uploads,
    rollback_upload, set_upload_labels, update_upload_metadata, verify_upload,
};
