//! Persisted staged-file metadata.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Key prefix for staged-file metadata records.
pub const FILE_KEY_PREFIX: &str = "md";
/// Key prefix for fragment byte streams.
pub const FRAGMENT_KEY_PREFIX: &str = "f";

/// One fragment of a staged file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// Full storage key, `f<file-id>+NNNN`.
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Size")]
    pub size: u64,
}

/// Metadata for one staged file, stored as JSON under `md<id>`.
///
/// `extra` is an opaque client payload: persisted verbatim, never
/// inspected.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileMeta {
    #[serde(rename = "ID")]
    pub id: String,
    /// Sum of all fragment sizes.
    pub size: u64,
    /// Index the next fragment will take. Monotonic, never reused.
    pub next_fragment_index: u32,
    /// Fragments in read order.
    pub fragments: Vec<Fragment>,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub modified: OffsetDateTime,
    #[serde(default)]
    pub creator: String,
    /// Deduplicated, sorted.
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(rename = "MD5", default)]
    pub md5: Vec<u8>,
    #[serde(rename = "SHA256", default)]
    pub sha256: Vec<u8>,
    #[serde(default)]
    pub extra: String,
}

impl FileMeta {
    /// Fresh metadata for a new staged file.
    pub fn new(id: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: id.into(),
            size: 0,
            next_fragment_index: 0,
            fragments: Vec::new(),
            created: now,
            modified: now,
            creator: String::new(),
            labels: Vec::new(),
            md5: Vec::new(),
            sha256: Vec::new(),
            extra: String::new(),
        }
    }

    /// The backing-store key this record lives under.
    pub fn metadata_key(&self) -> String {
        format!("{}{}", FILE_KEY_PREFIX, self.id)
    }

    /// The backing-store key for fragment number `n` of this file.
    pub fn fragment_key(&self, n: u32) -> String {
        format!("{}{}+{:04}", FRAGMENT_KEY_PREFIX, self.id, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape() {
        let mut meta = FileMeta::new("item42");
        meta.fragments.push(Fragment {
            id: meta.fragment_key(0),
            size: 7,
        });
        meta.size = 7;
        meta.next_fragment_index = 1;
        meta.md5 = vec![1, 2, 3];

        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"ID\":\"item42\""));
        assert!(json.contains("\"NextFragmentIndex\":1"));
        assert!(json.contains("\"Fragments\":[{\"ID\":\"fitem42+0000\",\"Size\":7}]"));
        assert!(json.contains("\"MD5\":[1,2,3]"));

        let back: FileMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "item42");
        assert_eq!(back.fragments, meta.fragments);
        assert_eq!(back.created, meta.created);
    }

    #[test]
    fn test_key_formats() {
        let meta = FileMeta::new("x");
        assert_eq!(meta.metadata_key(), "mdx");
        assert_eq!(meta.fragment_key(12), "fx+0012");
    }
}
