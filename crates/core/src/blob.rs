//! Blob references.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to one immutable blob: an item identifier plus the blob's
/// number within that item. Blob numbers start at 1; 0 is reserved.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobRef {
    /// The item this blob belongs to.
    pub item: String,
    /// The blob number inside the item.
    pub blob: u32,
}

impl BlobRef {
    /// Create a blob reference. Fails on an empty item or a zero blob
    /// number.
    pub fn new(item: impl Into<String>, blob: u32) -> Result<Self> {
        let item = item.into();
        if item.is_empty() {
            return Err(Error::InvalidBlobRef("empty item id".to_string()));
        }
        if blob == 0 {
            return Err(Error::InvalidBlobRef("blob numbers start at 1".to_string()));
        }
        Ok(Self { item, blob })
    }

    /// The key this blob is cached under: `<item>+<4-digit blob number>`.
    pub fn cache_key(&self) -> String {
        format!("{}+{:04}", self.item, self.blob)
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/@blob/{}", self.item, self.blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_format() {
        let r = BlobRef::new("abc123", 7).unwrap();
        assert_eq!(r.cache_key(), "abc123+0007");

        let r = BlobRef::new("abc123", 12345).unwrap();
        assert_eq!(r.cache_key(), "abc123+12345");
    }

    #[test]
    fn test_invalid_refs() {
        assert!(BlobRef::new("", 1).is_err());
        assert!(BlobRef::new("x", 0).is_err());
    }
}
