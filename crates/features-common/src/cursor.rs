//! Cursor based pagination.
//!
//! A cursor is an opaque token carrying the feature id (fid) to continue from
//! plus a checksum of the query params that filter the result set. Tokens are
//! only honoured while those params stay unchanged; any mismatch or garbage
//! resets pagination to the first page instead of failing the request.

use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const SEPARATOR: char = '.';

/// Query params that don't influence which features are selected.
pub const CHECKSUM_EXCLUDED_PARAMS: &[&str] = &["f", "cursor"];

/// Next and previous cursor of a page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Cursors {
    pub prev: EncodedCursor,
    pub next: EncodedCursor,

    pub has_prev: bool,
    pub has_next: bool,
}

impl Cursors {
    /// Build cursors from the boundaries of a page and the current filters checksum.
    pub fn new(fid: PrevNextFid, filters_checksum: &[u8]) -> Self {
        Self {
            prev: EncodedCursor::encode(fid.prev, filters_checksum),
            next: EncodedCursor::encode(fid.next, filters_checksum),
            has_prev: fid.prev > 0,
            has_next: fid.next > 0,
        }
    }
}

/// Previous and next feature id of a page, taken from the first row of a result window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrevNextFid {
    pub prev: i64,
    pub next: i64,
}

/// Cursor after decoding and validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedCursor {
    pub filters_checksum: Vec<u8>,
    pub fid: i64,
}

impl DecodedCursor {
    /// Cursor pointing at the start of the result set.
    pub fn first_page(filters_checksum: &[u8]) -> Self {
        Self {
            filters_checksum: filters_checksum.to_vec(),
            fid: 0,
        }
    }
}

/// URL-safe string form of a [`DecodedCursor`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedCursor(String);

impl EncodedCursor {
    /// Wrap a token as received in the `cursor` query param.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Format: `<base64 fid>.<base64 checksum>`, the fid as minimal big-endian bytes.
    pub fn encode(fid: i64, filters_checksum: &[u8]) -> Self {
        let fid_bytes = fid.max(0).to_be_bytes();
        let first_significant = fid_bytes
            .iter()
            .position(|b| *b != 0)
            .unwrap_or(fid_bytes.len());

        let mut token = URL_SAFE_NO_PAD.encode(&fid_bytes[first_significant..]);
        token.push(SEPARATOR);
        token.push_str(&URL_SAFE_NO_PAD.encode(filters_checksum));
        Self(token)
    }

    /// Decode and verify the filters checksum hasn't changed.
    ///
    /// Never fails: malformed tokens, negative fids and stale checksums
    /// all yield the first page.
    pub fn decode(&self, filters_checksum: &[u8]) -> DecodedCursor {
        let value = self.0.as_str();
        if value.is_empty() {
            return DecodedCursor::first_page(filters_checksum);
        }

        let Some((encoded_fid, encoded_checksum)) = value.split_once(SEPARATOR) else {
            warn!(cursor = value, "cursor doesn't contain expected separator");
            return DecodedCursor::first_page(filters_checksum);
        };

        let (fid_bytes, checksum) = match (
            URL_SAFE_NO_PAD.decode(encoded_fid),
            URL_SAFE_NO_PAD.decode(encoded_checksum),
        ) {
            (Ok(fid), Ok(checksum)) if fid.len() <= 8 => (fid, checksum),
            _ => {
                warn!(cursor = value, "decoding cursor value failed, defaulting to first page");
                return DecodedCursor::first_page(filters_checksum);
            }
        };

        let fid = fid_bytes
            .iter()
            .fold(0_u64, |acc, b| (acc << 8) | u64::from(*b));
        let fid = match i64::try_from(fid) {
            Ok(fid) => fid,
            Err(_) => {
                warn!(fid, "negative feature ID detected, defaulting to first page");
                0
            }
        };

        if checksum != filters_checksum {
            info!("filters in query params have changed during pagination, resetting to first page");
            return DecodedCursor::first_page(filters_checksum);
        }

        DecodedCursor {
            filters_checksum: filters_checksum.to_vec(),
            fid,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EncodedCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Checksum over the query params that filter the result set (limit, bbox,
/// crs, property filters, datetime, ...).
///
/// Keys are sorted, then the values of each key, and the concatenation is
/// hashed with CRC-32. No filtering params means an empty checksum.
pub fn filters_checksum<'a, I>(params: I) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut sorted: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (key, value) in params {
        if CHECKSUM_EXCLUDED_PARAMS.contains(&key) {
            continue;
        }
        sorted.entry(key).or_default().push(value);
    }

    let mut hasher = crc32fast::Hasher::new();
    let mut hashed_bytes = 0;
    for values in sorted.values_mut() {
        values.sort_unstable();
        for value in values.iter() {
            hasher.update(value.as_bytes());
            hashed_bytes += value.len();
        }
    }

    if hashed_bytes == 0 {
        return Vec::new();
    }
    hasher.finalize().to_be_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_round_trip() {
        let checksum = filters_checksum([("limit", "10"), ("bbox", "1,2,3,4")]);
        for fid in [1_i64, 255, 256, 65_535, 1 << 40, i64::MAX] {
            let cursor = EncodedCursor::encode(fid, &checksum);
            assert_eq!(cursor.decode(&checksum).fid, fid, "fid {}", fid);
        }
    }

    #[test]
    fn test_cursor_is_url_safe() {
        let cursor = EncodedCursor::encode(987_654_321, &[0xfb, 0xff, 0x3e]);
        assert!(cursor
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'));
    }

    #[test]
    fn test_decode_with_changed_checksum_resets() {
        let original = filters_checksum([("bbox", "1,2,3,4")]);
        let changed = filters_checksum([("bbox", "1,2,3,5")]);
        let cursor = EncodedCursor::encode(42, &original);

        let decoded = cursor.decode(&changed);
        assert_eq!(decoded.fid, 0);
        assert_eq!(decoded.filters_checksum, changed);
    }

    #[test]
    fn test_decode_garbage_resets() {
        let checksum = filters_checksum([("limit", "10")]);
        for token in ["", "no-separator", "!!!.???", "AQIDBAUGBwgJ.AA"] {
            let decoded = EncodedCursor::new(token).decode(&checksum);
            assert_eq!(decoded, DecodedCursor::first_page(&checksum), "token {:?}", token);
        }
    }

    #[test]
    fn test_decode_overflowing_fid_resets() {
        let checksum = filters_checksum([("limit", "10")]);
        let token = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode([0xff; 8]),
            URL_SAFE_NO_PAD.encode(&checksum)
        );
        assert_eq!(EncodedCursor::new(token).decode(&checksum).fid, 0);
    }

    #[test]
    fn test_cursors_flags() {
        let cursors = Cursors::new(PrevNextFid { prev: 0, next: 3 }, &[]);
        assert!(!cursors.has_prev);
        assert!(cursors.has_next);
        assert_eq!(cursors.next.decode(&[]).fid, 3);
    }

    #[test]
    fn test_checksum_ignores_order_and_excluded_params() {
        let a = filters_checksum([("limit", "10"), ("addr", "b"), ("addr", "a"), ("f", "json")]);
        let b = filters_checksum([("addr", "a"), ("cursor", "xyz"), ("addr", "b"), ("limit", "10")]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
    }

    #[test]
    fn test_checksum_empty_without_filters() {
        assert!(filters_checksum([("f", "json"), ("cursor", "abc")]).is_empty());
    }
}
