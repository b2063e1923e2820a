//! Content-addressed entity tags.

use crate::encoding::Encoding;
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use http::{HeaderMap, HeaderValue, header};
use md5::{Digest, Md5};

/// Computes the entity tag for a representation: the base64 encoded MD5
/// digest of `body` without padding.
pub fn content_etag(body: &[u8]) -> String {
    encode_digest(Md5::digest(body).as_slice())
}

/// Derives the entity tag of a lazily encoded representation from the tag
/// of the unencoded one.
pub fn derive_etag(previous: &str, encoding: Encoding) -> String {
    let mut hasher = Md5::new();
    hasher.update(previous.as_bytes());
    hasher.update(b";");
    hasher.update(encoding.as_str().as_bytes());
    encode_digest(hasher.finalize().as_slice())
}

fn encode_digest(digest: &[u8]) -> String {
    BASE64_STANDARD.encode(digest).trim_end_matches('=').to_string()
}

/// Strips the weakness indicator and quotes from an entity tag.
pub(crate) fn opaque_tag(value: &str) -> &str {
    let value = value.trim();
    value.strip_prefix("W/").unwrap_or(value).trim_matches('"')
}

/// Returns the opaque tag of the response's ETag header.
pub(crate) fn etag(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(opaque_tag)
}

/// Returns true if the response's ETag header is a weak validator.
pub(crate) fn is_weak(headers: &HeaderMap) -> bool {
    headers
        .get(header::ETAG)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().starts_with("W/"))
}

/// Sets a strong ETag header.
pub(crate) fn set_etag(headers: &mut HeaderMap, tag: &str) {
    write_etag(headers, tag, false);
}

/// Sets a weak ETag header.
pub(crate) fn set_weak_etag(headers: &mut HeaderMap, tag: &str) {
    write_etag(headers, tag, true);
}

fn write_etag(headers: &mut HeaderMap, tag: &str, weak: bool) {
    let prefix = if weak { "W/" } else { "" };
    match HeaderValue::from_str(&format!("{prefix}\"{tag}\"")) {
        Ok(value) => {
            headers.insert(header::ETAG, value);
        }
        Err(_) => tracing::warn!(tag, "entity tag is not a valid header value"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_etag_is_content_addressed() {
        assert_eq!(content_etag(b"data"), content_etag(b"data"));
        assert_ne!(content_etag(b"data"), content_etag(b"date"));
    }

    #[test]
    fn test_content_etag_known_value() {
        // md5("data") = 8d777f385d3dfec8815d20f7496026dc
        assert_eq!(content_etag(b"data"), "jXd/OF09/siBXSD3SWAm3A");
    }

    #[test]
    fn test_content_etag_has_no_padding() {
        assert!(!content_etag(b"").ends_with('='));
        assert_eq!(content_etag(b"").len(), 22);
    }

    #[test]
    fn test_derive_etag_hashes_tagged_previous() {
        assert_eq!(derive_etag("abc", Encoding::Gzip), content_etag(b"abc;gzip"));
        assert_eq!(derive_etag("abc", Encoding::Brotli), content_etag(b"abc;br"));
    }

    #[test]
    fn test_opaque_tag() {
        assert_eq!(opaque_tag("\"abc\""), "abc");
        assert_eq!(opaque_tag("W/\"abc\""), "abc");
        assert_eq!(opaque_tag(" abc "), "abc");
    }

    #[test]
    fn test_set_and_read_etag() {
        let mut headers = HeaderMap::new();
        set_etag(&mut headers, "jXd/OF09/siBXSD3SWAm3A");
        assert_eq!(headers.get(header::ETAG).unwrap(), "\"jXd/OF09/siBXSD3SWAm3A\"");
        assert_eq!(etag(&headers), Some("jXd/OF09/siBXSD3SWAm3A"));
        assert!(!is_weak(&headers));
    }

    #[test]
    fn test_set_and_read_weak_etag() {
        let mut headers = HeaderMap::new();
        set_weak_etag(&mut headers, "abc");
        assert_eq!(headers.get(header::ETAG).unwrap(), "W/\"abc\"");
        assert_eq!(etag(&headers), Some("abc"));
        assert!(is_weak(&headers));
    }
}
