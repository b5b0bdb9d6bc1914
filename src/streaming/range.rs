//! HTTP `Range` header parsing.
//!
//! Parsing is purely syntactic and independent of the asset size, because a
//! range can arrive before the total is known (the entry is still being
//! written). [`ByteRange::resolve`] applies it to a known total.

/// A single `bytes=` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=a-b`
    Bounded { start: u64, end: u64 },
    /// `bytes=a-`
    From { start: u64 },
    /// `bytes=-n` (last n bytes)
    Suffix { len: u64 },
}

/// A range that cannot be satisfied against the asset's size (416).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unsatisfiable;

impl ByteRange {
    /// First byte requested, if it does not depend on the total.
    pub fn start(&self) -> Option<u64> {
        match *self {
            ByteRange::Bounded { start, .. } | ByteRange::From { start } => Some(start),
            ByteRange::Suffix { .. } => None,
        }
    }

    /// Whether this range asks for the whole asset from the beginning.
    pub fn is_whole(&self) -> bool {
        matches!(self, ByteRange::From { start: 0 })
    }

    /// Inclusive `(start, end)` against an asset of `total` bytes.
    ///
    /// An end past EOF is clamped; a start at or past EOF is unsatisfiable.
    pub fn resolve(&self, total: u64) -> Result<(u64, u64), Unsatisfiable> {
        if total == 0 {
            return Err(Unsatisfiable);
        }
        match *self {
            ByteRange::Bounded { start, end } => {
                if start >= total {
                    return Err(Unsatisfiable);
                }
                Ok((start, end.min(total - 1)))
            }
            ByteRange::From { start } => {
                if start >= total {
                    return Err(Unsatisfiable);
                }
                Ok((start, total - 1))
            }
            ByteRange::Suffix { len } => {
                if len == 0 {
                    return Err(Unsatisfiable);
                }
                Ok((total.saturating_sub(len), total - 1))
            }
        }
    }
}

/// Parse HTTP Range header.
///
/// Supports formats:
/// - bytes=0-499
/// - bytes=500-
/// - bytes=-500 (last 500 bytes)
///
/// Returns `None` for anything else, including multi-range requests and
/// `start > end`; callers ignore such headers and serve the whole asset.
pub fn parse_range_header(header: &str) -> Option<ByteRange> {
    let spec = header.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }

    let (start, end) = spec.split_once('-')?;
    let start = start.trim();
    let end = end.trim();

    match (start.is_empty(), end.is_empty()) {
        (true, false) => Some(ByteRange::Suffix {
            len: end.parse().ok()?,
        }),
        (false, true) => Some(ByteRange::From {
            start: start.parse().ok()?,
        }),
        (false, false) => {
            let start: u64 = start.parse().ok()?;
            let end: u64 = end.parse().ok()?;
            if start > end {
                return None;
            }
            Some(ByteRange::Bounded { start, end })
        }
        (true, true) => None,
    }
}

/// `Content-Range` value for a satisfied range; `*` when the total is unknown.
pub fn content_range(start: u64, end: u64, total: Option<u64>) -> String {
    match total {
        Some(total) => format!("bytes {start}-{end}/{total}"),
        None => format!("bytes {start}-{end}/*"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range_header_full_range() {
        assert_eq!(
            parse_range_header("bytes=0-499"),
            Some(ByteRange::Bounded { start: 0, end: 499 })
        );
    }

    #[test]
    fn test_parse_range_header_open_end() {
        assert_eq!(
            parse_range_header("bytes=500-"),
            Some(ByteRange::From { start: 500 })
        );
    }

    #[test]
    fn test_parse_range_header_suffix() {
        assert_eq!(
            parse_range_header("bytes=-200"),
            Some(ByteRange::Suffix { len: 200 })
        );
    }

    #[test]
    fn test_parse_range_header_invalid_format() {
        assert_eq!(parse_range_header("bytes=-"), None);
        assert_eq!(parse_range_header("bytes=abc-def"), None);
        assert_eq!(parse_range_header("bytes=500-100"), None);
        assert_eq!(parse_range_header("bytes=0-1,5-6"), None);
        assert_eq!(parse_range_header("items=0-1"), None);
        assert_eq!(parse_range_header("bytes=5"), None);
    }

    #[test]
    fn test_resolve_table() {
        let total = 1000;
        let cases = [
            (ByteRange::Bounded { start: 100, end: 199 }, Ok((100, 199))),
            (ByteRange::Bounded { start: 0, end: 2000 }, Ok((0, 999))),
            (ByteRange::Bounded { start: 999, end: 999 }, Ok((999, 999))),
            (ByteRange::Bounded { start: 1000, end: 1100 }, Err(Unsatisfiable)),
            (ByteRange::From { start: 500 }, Ok((500, 999))),
            (ByteRange::From { start: 1500 }, Err(Unsatisfiable)),
            (ByteRange::Suffix { len: 200 }, Ok((800, 999))),
            (ByteRange::Suffix { len: 5000 }, Ok((0, 999))),
            (ByteRange::Suffix { len: 0 }, Err(Unsatisfiable)),
        ];
        for (range, expected) in cases {
            assert_eq!(range.resolve(total), expected, "{range:?}");
        }
    }

    #[test]
    fn test_resolve_empty_asset() {
        assert_eq!(
            ByteRange::From { start: 0 }.resolve(0),
            Err(Unsatisfiable)
        );
    }

    #[test]
    fn test_content_range_format() {
        assert_eq!(content_range(100, 199, Some(1000)), "bytes 100-199/1000");
        assert_eq!(content_range(0, 999, None), "bytes 0-999/*");
    }

    #[test]
    fn test_whole_and_start() {
        assert!(ByteRange::From { start: 0 }.is_whole());
        assert!(!ByteRange::Bounded { start: 0, end: 10 }.is_whole());
        assert_eq!(ByteRange::Suffix { len: 3 }.start(), None);
        assert_eq!(ByteRange::From { start: 7 }.start(), Some(7));
    }
}
