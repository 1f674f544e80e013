//! Channel address derivation.

use crate::traits::TransportError;
use url::Url;

/// Default path of the presence channel off the application origin.
pub const DEFAULT_CHANNEL_PATH: &str = "/ws/presence";

/// Derive the presence channel URL from the application origin.
///
/// The channel scheme follows the origin's transport security: `http`
/// maps to `ws` and `https` to `wss`. Origins already using `ws`/`wss`
/// are kept as-is. Any path, query or fragment on the origin is replaced.
///
/// # Errors
///
/// Returns an error if the origin cannot be parsed or uses another scheme.
pub fn channel_url(origin: &str, path: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(origin).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::InvalidUrl(format!(
                "Unsupported origin scheme: {}",
                other
            )))
        }
    };

    url.set_scheme(scheme)
        .map_err(|_| TransportError::InvalidUrl(format!("Cannot switch scheme to {}", scheme)))?;
    url.set_path(path);
    url.set_query(None);
    url.set_fragment(None);

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insecure_origin() {
        let url = channel_url("http://localhost:3000", DEFAULT_CHANNEL_PATH).unwrap();
        assert_eq!(url.as_str(), "ws://localhost:3000/ws/presence");
    }

    #[test]
    fn test_secure_origin() {
        let url = channel_url("https://learn.example.com/courses/12?tab=1#top", "/ws").unwrap();
        assert_eq!(url.as_str(), "wss://learn.example.com/ws");
    }

    #[test]
    fn test_rejects_other_schemes() {
        assert!(channel_url("ftp://example.com", "/ws").is_err());
        assert!(channel_url("not a url", "/ws").is_err());
    }
}
