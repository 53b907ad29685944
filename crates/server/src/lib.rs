//! HTTP daemon for the Stacks preservation store.
//!
//! This crate provides the serving layer over the cache, fragment, and
//! storage crates:
//! - The blob read path: cache hit / too-large bypass / populate-and-wait,
//!   with single-flight coalescing and an error ledger
//! - Upload staging endpoints over the fragment store
//! - Range serving through a seekable adapter
//! - App state, routes, and API error mapping

pub mod content;
pub mod error;
pub mod flight;
pub mod handlers;
pub mod ledger;
pub mod ranged;
pub mod routes;
pub mod state;
pub mod tape;

pub use content::{Content, ContentFinder, FindError, PopulateError};
pub use error::{ApiError, ApiResult};
pub use flight::Flight;
pub use ledger::ErrorLedger;
pub use ranged::{RangedReader, SeekError, Whence};
pub use routes::create_router;
pub use state::AppState;
pub use tape::{BundleSource, DisabledSource, StoreSource, TapeError};
