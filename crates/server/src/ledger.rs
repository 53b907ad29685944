//! Short-horizon memory of recent populate failures.
//!
//! When copying a blob from tape into the cache fails, the failure is
//! remembered here for a short window so the next requests for the same
//! key fail fast instead of hammering the tape system. Entries expire on
//! their own; recovery from a transient fault needs no intervention.

use crate::content::PopulateError;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How long a recorded failure keeps short-circuiting requests.
const ERROR_TTL: Duration = Duration::from_secs(30);

struct LedgerEntry {
    key: String,
    error: PopulateError,
    expires: Instant,
}

/// Time-bounded map of recent per-key errors.
///
/// Few errors are expected, so entries live in a list instead of a map;
/// appending keeps them ordered by expiry, which makes pruning a simple
/// truncation.
#[derive(Default)]
pub struct ErrorLedger {
    entries: Mutex<Vec<LedgerEntry>>,
    ttl: Option<Duration>,
}

impl ErrorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            ttl: Some(ttl),
        }
    }

    fn ttl(&self) -> Duration {
        self.ttl.unwrap_or(ERROR_TTL)
    }

    /// Record a failure for `key`.
    pub fn add(&self, key: &str, error: PopulateError) {
        let mut entries = self.entries.lock().unwrap();
        entries.push(LedgerEntry {
            key: key.to_string(),
            error,
            expires: Instant::now() + self.ttl(),
        });
    }

    /// The most recent unexpired error for `key`, if any. Expired
    /// entries encountered on the way are pruned.
    pub fn find(&self, key: &str) -> Option<PopulateError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        // scan backward so the first expired entry ends the search: the
        // list is in expiry order, everything before it is dead too
        let mut i = entries.len();
        while i > 0 {
            i -= 1;
            if entries[i].expires <= now {
                entries.drain(..=i);
                return None;
            }
            if entries[i].key == key {
                return Some(entries[i].error.clone());
            }
        }
        None
    }
}
