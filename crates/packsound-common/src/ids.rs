//! Canonical identities for media references.
//!
//! [`resolve_reference`] turns free-form user input (a watch URL, a bare
//! video id, a generic media URL or a search query) into a [`SourceRef`]: the
//! stable cache key plus the locator handed to the extraction backend.
//!
//! Resolution is pure. Identical input always yields identical output,
//! independent of network state, which is what makes request coalescing and
//! caching by id correct.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

use crate::error::MediaError;

/// Maximum accepted length of a raw reference, in bytes.
pub const MAX_REFERENCE_LEN: usize = 2048;

/// Maximum length of a platform id token.
const MAX_TOKEN_LEN: usize = 64;

/// Number of hex characters kept from the SHA-256 digest of hashed ids.
const HASH_HEX_LEN: usize = 16;

const YOUTUBE_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "youtube-nocookie.com",
    "www.youtube-nocookie.com",
];

/// Path prefixes on YouTube hosts that carry the video id as the next segment.
const YOUTUBE_ID_PATHS: &[&str] = &["shorts", "embed", "live", "v"];

/// Normalized cache key for a media source.
///
/// Always a safe filename stem: either a platform id (`[A-Za-z0-9_-]{1,64}`)
/// or a hashed id (`g.` for generic URLs, `q.` for search queries, followed by
/// 16 lowercase hex characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CanonicalId(String);

impl CanonicalId {
    /// Validate an already-canonical key.
    pub fn parse(s: &str) -> Option<Self> {
        if is_platform_token(s) || is_hashed_id(s) {
            Some(Self(s.to_string()))
        } else {
            None
        }
    }

    /// Whether this id was derived by hashing (and so cannot be re-resolved on its own).
    pub fn is_hashed(&self) -> bool {
        is_hashed_id(&self.0)
    }

    /// Borrow the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn hashed(prefix: char, input: &str) -> Self {
        let digest = Sha256::digest(input.as_bytes());
        let hex = hex::encode(digest);
        Self(format!("{prefix}.{}", &hex[..HASH_HEX_LEN]))
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CanonicalId {
    type Error = MediaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or(MediaError::InvalidReference)
    }
}

impl From<CanonicalId> for String {
    fn from(id: CanonicalId) -> Self {
        id.0
    }
}

/// A resolved reference: cache key plus what to hand the extraction backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Cache and coalescing key.
    pub id: CanonicalId,
    /// Backend locator. `None` for a bare hashed id, which can only be served
    /// from cache.
    pub locator: Option<String>,
}

impl SourceRef {
    /// Whether the source can be extracted from scratch.
    pub fn is_resolvable(&self) -> bool {
        self.locator.is_some()
    }
}

/// Resolve a raw reference into its canonical identity.
///
/// # Errors
///
/// Returns [`MediaError::InvalidReference`] for empty or oversized input,
/// input containing control characters, and URLs with a non-http(s) scheme.
pub fn resolve_reference(raw: &str) -> Result<SourceRef, MediaError> {
    let input = raw.trim();
    if input.is_empty() || input.len() > MAX_REFERENCE_LEN {
        return Err(MediaError::InvalidReference);
    }
    if input.chars().any(char::is_control) {
        return Err(MediaError::InvalidReference);
    }

    if is_platform_token(input) {
        return Ok(SourceRef {
            id: CanonicalId(input.to_string()),
            locator: Some(input.to_string()),
        });
    }

    if is_hashed_id(input) {
        return Ok(SourceRef {
            id: CanonicalId(input.to_string()),
            locator: None,
        });
    }

    if let Some(url) = parse_url(input)? {
        return Ok(resolve_url(url));
    }

    Ok(resolve_search(input))
}

fn parse_url(input: &str) -> Result<Option<Url>, MediaError> {
    if input.contains(char::is_whitespace) {
        return Ok(None);
    }

    if let Some((scheme, _)) = input.split_once("://") {
        let url = Url::parse(input).map_err(|_| MediaError::InvalidReference)?;
        if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
            return Err(MediaError::InvalidReference);
        }
        return Ok(Some(url));
    }

    // Schemeless links pasted from an address bar.
    let lower = input.to_ascii_lowercase();
    let looks_like_link = lower.starts_with("youtu.be/")
        || YOUTUBE_HOSTS
            .iter()
            .any(|host| lower.starts_with(&format!("{host}/")));
    if looks_like_link {
        let url = Url::parse(&format!("https://{input}"))
            .map_err(|_| MediaError::InvalidReference)?;
        return Ok(Some(url));
    }

    Ok(None)
}

fn resolve_url(mut url: Url) -> SourceRef {
    url.set_fragment(None);

    if let Some(video_id) = youtube_video_id(&url) {
        return SourceRef {
            locator: Some(format!("https://www.youtube.com/watch?v={video_id}")),
            id: CanonicalId(video_id),
        };
    }

    let normalized = url.to_string();
    SourceRef {
        id: CanonicalId::hashed('g', &normalized),
        locator: Some(normalized),
    }
}

fn youtube_video_id(url: &Url) -> Option<String> {
    let host = url.host_str()?;

    if host == "youtu.be" {
        let id = url.path_segments()?.next()?;
        return is_platform_token(id).then(|| id.to_string());
    }

    if !YOUTUBE_HOSTS.contains(&host) {
        return None;
    }

    let mut segments = url.path_segments()?;
    match segments.next()? {
        "watch" => url
            .query_pairs()
            .find(|(k, _)| k == "v")
            .map(|(_, v)| v.into_owned())
            .filter(|v| is_platform_token(v)),
        prefix if YOUTUBE_ID_PATHS.contains(&prefix) => {
            let id = segments.next()?;
            is_platform_token(id).then(|| id.to_string())
        }
        _ => None,
    }
}

fn resolve_search(input: &str) -> SourceRef {
    let query = input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    SourceRef {
        id: CanonicalId::hashed('q', &query),
        locator: Some(format!("ytsearch1:{query}")),
    }
}

fn is_platform_token(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_TOKEN_LEN
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn is_hashed_id(s: &str) -> bool {
    let Some((prefix, hash)) = s.split_once('.') else {
        return false;
    };
    matches!(prefix, "g" | "q")
        && hash.len() == HASH_HEX_LEN
        && hash
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_of(raw: &str) -> String {
        resolve_reference(raw).unwrap().id.to_string()
    }

    #[test]
    fn bare_token_is_its_own_id() {
        let source = resolve_reference("abc123").unwrap();
        assert_eq!(source.id.as_str(), "abc123");
        assert_eq!(source.locator.as_deref(), Some("abc123"));
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        assert_eq!(id_of("  dQw4w9WgXcQ \n"), "dQw4w9WgXcQ");
    }

    #[test]
    fn youtube_url_forms_share_one_id() {
        let forms = [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/watch?v=dQw4w9WgXcQ&t=42",
            "https://m.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://music.youtube.com/watch?v=dQw4w9WgXcQ&list=RDAMVM",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ?si=tracking",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ#comments",
            "youtube.com/watch?v=dQw4w9WgXcQ",
            "youtu.be/dQw4w9WgXcQ",
        ];
        for form in forms {
            let source = resolve_reference(form).unwrap();
            assert_eq!(source.id.as_str(), "dQw4w9WgXcQ", "{form}");
            assert_eq!(
                source.locator.as_deref(),
                Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
            );
        }
    }

    #[test]
    fn generic_url_is_hashed_and_normalized() {
        let a = resolve_reference("https://Example.COM:443/audio/track.mp3#t=1").unwrap();
        let b = resolve_reference("https://example.com/audio/track.mp3").unwrap();
        assert_eq!(a.id, b.id);
        assert!(a.id.as_str().starts_with("g."));
        assert!(a.id.is_hashed());
        assert_eq!(
            a.locator.as_deref(),
            Some("https://example.com/audio/track.mp3")
        );
    }

    #[test]
    fn playlist_only_url_is_generic() {
        let source =
            resolve_reference("https://www.youtube.com/playlist?list=PL1234567890").unwrap();
        assert!(source.id.as_str().starts_with("g."));
    }

    #[test]
    fn search_query_is_hashed() {
        let a = resolve_reference("never gonna   give you up").unwrap();
        let b = resolve_reference("Never Gonna Give You Up").unwrap();
        assert_eq!(a.id, b.id);
        assert!(a.id.as_str().starts_with("q."));
        assert_eq!(
            a.locator.as_deref(),
            Some("ytsearch1:never gonna give you up")
        );
    }

    #[test]
    fn hashed_id_alone_has_no_locator() {
        let hashed = resolve_reference("some search words").unwrap().id;
        let again = resolve_reference(hashed.as_str()).unwrap();
        assert_eq!(again.id, hashed);
        assert!(!again.is_resolvable());
    }

    #[test]
    fn resolution_is_deterministic() {
        for raw in ["abc123", "https://youtu.be/xyz", "lofi beats", "https://a.b/c"] {
            assert_eq!(resolve_reference(raw), resolve_reference(raw));
        }
    }

    #[test]
    fn invalid_references() {
        assert_eq!(resolve_reference(""), Err(MediaError::InvalidReference));
        assert_eq!(resolve_reference("   "), Err(MediaError::InvalidReference));
        assert_eq!(
            resolve_reference("ftp://example.com/file.mp3"),
            Err(MediaError::InvalidReference)
        );
        assert_eq!(
            resolve_reference("file:///etc/passwd"),
            Err(MediaError::InvalidReference)
        );
        assert_eq!(
            resolve_reference("abc\u{0}def"),
            Err(MediaError::InvalidReference)
        );
        let long = "a".repeat(MAX_REFERENCE_LEN + 1);
        assert_eq!(resolve_reference(&long), Err(MediaError::InvalidReference));
    }

    #[test]
    fn path_traversal_never_becomes_an_id() {
        let source = resolve_reference("../../etc/passwd").unwrap();
        assert!(source.id.as_str().starts_with("q."));
        assert!(!source.id.as_str().contains('/'));
    }

    #[test]
    fn canonical_id_parse() {
        assert!(CanonicalId::parse("abc_DEF-123").is_some());
        assert!(CanonicalId::parse("q.0123456789abcdef").is_some());
        assert!(CanonicalId::parse("x.0123456789abcdef").is_none());
        assert!(CanonicalId::parse("q.0123456789ABCDEF").is_none());
        assert!(CanonicalId::parse("a/b").is_none());
        assert!(CanonicalId::parse("").is_none());
    }

    #[test]
    fn canonical_id_serde_roundtrip_validates() {
        let id: CanonicalId = serde_json::from_str("\"abc123\"").unwrap();
        assert_eq!(id.as_str(), "abc123");
        assert!(serde_json::from_str::<CanonicalId>("\"../x\"").is_err());
    }
}
