//! Staged uploads for the Stacks preservation daemon.
//!
//! Files arrive at the server in consecutive pieces ("fragments") of
//! arbitrary size and are read back as a single unit while they wait to
//! be bundled onto tape. Fragments and the per-file metadata records
//! both live in the backing store, so staging state survives restarts.

pub mod error;
pub mod meta;
pub mod store;

pub use error::{FragmentError, FragmentResult};
pub use meta::{FileMeta, Fragment, FILE_KEY_PREFIX, FRAGMENT_KEY_PREFIX};
pub use store::{FragmentReader, FragmentStore, FragmentWriter, StagedFile};
