//! Core domain types and shared logic for the Stacks preservation daemon.
//!
//! This crate defines the data model used across all other crates:
//! - Blob references (item + blob number) and their cache keys
//! - Daemon configuration

pub mod blob;
pub mod config;
pub mod error;

pub use blob::BlobRef;
pub use config::{AppConfig, CacheConfig, StorageConfig, TapeConfig};
pub use error::{Error, Result};
