#[cfg(feature = "brotli")]
use compression_codecs::brotli::{BrotliEncoder, params::EncoderParams as BrotliParams};
#[cfg(feature = "gzip")]
use compression_codecs::gzip::GzipEncoder;
use compression_codecs::EncodeV2;
#[cfg(feature = "gzip")]
use compression_core::Level;
use http::HeaderValue;

/// Content encodings the pipeline can negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// No transformation.
    Identity,
    /// Brotli compression.
    Brotli,
    /// Gzip compression.
    Gzip,
}

/// Encodings offered to the client, in priority order for equal quality.
const OFFERS: &[Encoding] = &[
    Encoding::Identity,
    #[cfg(feature = "brotli")]
    Encoding::Brotli,
    #[cfg(feature = "gzip")]
    Encoding::Gzip,
];

impl Encoding {
    /// Returns the Content-Encoding token for this encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Identity => "identity",
            Encoding::Brotli => "br",
            Encoding::Gzip => "gzip",
        }
    }

    pub(crate) fn header_value(&self) -> HeaderValue {
        HeaderValue::from_static(self.as_str())
    }

    /// Creates a new encoder, or `None` for identity and disabled codecs.
    pub(crate) fn encoder(&self) -> Option<Box<dyn EncodeV2 + Send>> {
        match self {
            Encoding::Identity => None,
            #[cfg(feature = "brotli")]
            Encoding::Brotli => Some(Box::new(BrotliEncoder::new(BrotliParams::default()))),
            #[cfg(feature = "gzip")]
            Encoding::Gzip => Some(Box::new(GzipEncoder::new(Level::Default.into()))),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    fn matches(&self, token: &str) -> bool {
        let names: &[&str] = match self {
            Encoding::Identity => &["identity"],
            Encoding::Brotli => &["br", "brotli"],
            Encoding::Gzip => &["gzip", "x-gzip"],
        };
        names.iter().any(|name| token.eq_ignore_ascii_case(name))
    }

    /// Resolves the client's Accept-Encoding header against the offered
    /// encodings.
    ///
    /// The header value is expected to be comma-separated encodings with optional
    /// quality values (e.g., "gzip, br;q=1.0, *;q=0.1"). A missing header, or one
    /// that matches nothing, resolves to [`Encoding::Identity`]. Ties go to the
    /// encoding offered first: identity, then brotli, then gzip.
    pub fn negotiate(header: Option<&str>) -> Encoding {
        let Some(header) = header else {
            return Encoding::Identity;
        };

        let preferences: Vec<(&str, f32)> = header
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(parse_encoding_with_quality)
            .collect();

        let mut best: Option<(Encoding, f32)> = None;

        for &offer in OFFERS {
            let quality = preferences
                .iter()
                .find(|(token, _)| offer.matches(token))
                .or_else(|| preferences.iter().find(|(token, _)| *token == "*"))
                .map(|&(_, quality)| quality);

            // Skip if not acceptable
            let Some(quality) = quality.filter(|q| *q > 0.0) else {
                continue;
            };

            if best.is_none_or(|(_, best_quality)| quality > best_quality) {
                best = Some((offer, quality));
            }
        }

        best.map_or(Encoding::Identity, |(encoding, _)| encoding)
    }
}

/// Parses an encoding entry like "gzip" or "br;q=0.8" into (encoding, quality).
fn parse_encoding_with_quality(s: &str) -> (&str, f32) {
    let mut parts = s.splitn(2, ';');
    let encoding = parts.next().unwrap_or("").trim();

    let quality = parts
        .next()
        .and_then(|q| {
            let q = q.trim();
            q.strip_prefix("q=")
                .or_else(|| q.strip_prefix("Q="))
                .and_then(|q| q.trim().parse::<f32>().ok())
        })
        .unwrap_or(1.0);

    (encoding, quality)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_str() {
        assert_eq!(Encoding::Identity.as_str(), "identity");
        assert_eq!(Encoding::Brotli.as_str(), "br");
        assert_eq!(Encoding::Gzip.as_str(), "gzip");
    }

    #[test]
    fn test_missing_header_is_identity() {
        assert_eq!(Encoding::negotiate(None), Encoding::Identity);
        assert_eq!(Encoding::negotiate(Some("")), Encoding::Identity);
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_negotiate_simple() {
        assert_eq!(Encoding::negotiate(Some("gzip")), Encoding::Gzip);
        assert_eq!(Encoding::negotiate(Some("x-gzip")), Encoding::Gzip);
        assert_eq!(Encoding::negotiate(Some("GZIP")), Encoding::Gzip);
    }

    #[test]
    #[cfg(all(feature = "gzip", feature = "brotli"))]
    fn test_equal_quality_prefers_brotli() {
        assert_eq!(Encoding::negotiate(Some("gzip, br")), Encoding::Brotli);
        assert_eq!(Encoding::negotiate(Some("br, gzip")), Encoding::Brotli);
    }

    #[test]
    #[cfg(all(feature = "gzip", feature = "brotli"))]
    fn test_negotiate_with_quality() {
        assert_eq!(
            Encoding::negotiate(Some("gzip;q=1.0, br;q=0.5")),
            Encoding::Gzip
        );
        assert_eq!(
            Encoding::negotiate(Some("gzip;q=0.5, br;q=1.0")),
            Encoding::Brotli
        );
    }

    #[test]
    fn test_wildcard_prefers_identity() {
        assert_eq!(Encoding::negotiate(Some("*")), Encoding::Identity);
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_explicit_identity_loses_to_higher_quality() {
        assert_eq!(
            Encoding::negotiate(Some("identity;q=0.5, gzip")),
            Encoding::Gzip
        );
        assert_eq!(
            Encoding::negotiate(Some("*;q=0.5, gzip")),
            Encoding::Gzip
        );
    }

    #[test]
    fn test_unsupported_is_identity() {
        assert_eq!(Encoding::negotiate(Some("compress")), Encoding::Identity);
        assert_eq!(Encoding::negotiate(Some("zstd, deflate")), Encoding::Identity);
    }

    #[test]
    #[cfg(all(feature = "gzip", feature = "brotli"))]
    fn test_quality_zero() {
        assert_eq!(Encoding::negotiate(Some("gzip;q=0")), Encoding::Identity);
        assert_eq!(Encoding::negotiate(Some("gzip;q=0, br")), Encoding::Brotli);
    }

    #[test]
    fn test_identity_has_no_encoder() {
        assert!(Encoding::Identity.encoder().is_none());
    }
}
