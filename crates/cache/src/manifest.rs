//! Cache index manifest.
//!
//! The manifest records every cache entry so a restarted daemon can
//! rebuild its index without trusting file timestamps. One UTF-8 line
//! per entry:
//!
//! ```text
//! <key> <size-bytes> <expires-unix-nanos>
//! ```
//!
//! Fields are space separated, lines newline terminated, order
//! irrelevant. Fields beyond the third are ignored so later versions can
//! append to the record.

use std::fmt::Write as _;
use time::OffsetDateTime;

/// One manifest record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    pub key: String,
    pub size: u64,
    pub expires: OffsetDateTime,
}

/// Render manifest entries to the on-disk text form.
pub fn render(entries: impl IntoIterator<Item = ManifestEntry>) -> String {
    let mut out = String::new();
    for e in entries {
        // Writing to a String cannot fail.
        let _ = writeln!(
            out,
            "{} {} {}",
            e.key,
            e.size,
            e.expires.unix_timestamp_nanos()
        );
    }
    out
}

/// Parse the on-disk text form. Malformed lines are skipped with a
/// warning so one corrupt record does not take the whole index down.
pub fn parse(text: &str) -> Vec<ManifestEntry> {
    let mut entries = Vec::new();
    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split(' ');
        let parsed = (|| {
            let key = fields.next()?;
            let size = fields.next()?.parse::<u64>().ok()?;
            let nanos = fields.next()?.parse::<i128>().ok()?;
            let expires = OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()?;
            Some(ManifestEntry {
                key: key.to_string(),
                size,
                expires,
            })
        })();
        match parsed {
            Some(entry) => entries.push(entry),
            None => tracing::warn!(line, "skipping malformed cache manifest line"),
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, size: u64, nanos: i128) -> ManifestEntry {
        ManifestEntry {
            key: key.to_string(),
            size,
            expires: OffsetDateTime::from_unix_timestamp_nanos(nanos).unwrap(),
        }
    }

    #[test]
    fn test_roundtrip() {
        let entries = vec![
            entry("item1+0001", 11, 1_700_000_000_000_000_000),
            entry("item2+0042", 0, 1_700_000_123_456_789_012),
        ];
        let text = render(entries.clone());
        assert_eq!(parse(&text), entries);
    }

    #[test]
    fn test_unknown_trailing_fields_ignored() {
        let parsed = parse("k 5 1700000000000000000 future-field another\n");
        assert_eq!(parsed, vec![entry("k", 5, 1_700_000_000_000_000_000)]);
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let parsed = parse("good 1 1700000000000000000\nbad line here\n\nshort\n");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].key, "good");
    }
}
