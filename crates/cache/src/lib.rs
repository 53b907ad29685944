//! Blob cache for the Stacks preservation daemon.
//!
//! Content recalled from slow backing storage is parked here so repeat
//! reads are fast. Entries expire on a TTL refreshed by use, total size
//! is capped, and the index is persisted so a restart picks up where it
//! left off.

pub mod cache;
pub mod error;
pub mod manifest;

pub use cache::{CacheReader, CacheWriter, TimeCache};
pub use error::{CacheError, CacheResult};
