//! Request metadata and client identity.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Placeholder for absent request metadata.
pub const UNKNOWN: &str = "unknown";

/// Length of a client identifier in hex characters.
const CLIENT_ID_LEN: usize = 16;

/// The slice of an HTTP request the limiter needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestMeta {
    /// Peer address of the connection
    pub remote_addr: Option<String>,
    /// Raw `X-Forwarded-For` header value
    pub forwarded_for: Option<String>,
    /// Raw `User-Agent` header value
    pub user_agent: Option<String>,
    pub path: String,
    pub method: String,
}

impl RequestMeta {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    pub fn with_forwarded_for(mut self, header: impl Into<String>) -> Self {
        self.forwarded_for = Some(header.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Peer address, or `unknown`. Allow and deny lists match against this.
    pub fn remote_address(&self) -> &str {
        non_empty(self.remote_addr.as_deref()).unwrap_or(UNKNOWN)
    }

    /// Originating address: the first forwarded-for hop if present,
    /// otherwise the peer address.
    pub fn source_address(&self) -> &str {
        let forwarded = self
            .forwarded_for
            .as_deref()
            .and_then(|header| header.split(',').next());
        non_empty(forwarded).unwrap_or_else(|| self.remote_address())
    }

    pub fn user_agent(&self) -> &str {
        non_empty(self.user_agent.as_deref()).unwrap_or(UNKNOWN)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Derive the stable, hashed identifier for the client behind a request.
///
/// The identifier is the first 16 hex characters of
/// `sha256("<source address>:<user agent>")`.
pub fn client_id(meta: &RequestMeta) -> String {
    let digest = Sha256::digest(format!("{}:{}", meta.source_address(), meta.user_agent()));
    let mut id = hex::encode(digest);
    id.truncate(CLIENT_ID_LEN);
    id
}

/// Shorten an identifier for diagnostics.
pub fn mask_client_id(client_id: &str) -> String {
    let prefix: String = client_id.chars().take(8).collect();
    format!("{}...", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_shape() {
        let meta = RequestMeta::new("GET", "/").with_remote_addr("10.0.0.1");
        let id = client_id(&meta);

        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_client_id_matches_sha256_prefix() {
        let meta = RequestMeta::new("GET", "/")
            .with_remote_addr("127.0.0.1")
            .with_user_agent("curl/8.0");

        let expected = hex::encode(Sha256::digest(b"127.0.0.1:curl/8.0"));
        assert_eq!(client_id(&meta), &expected[..16]);
    }

    #[test]
    fn test_client_id_is_stable() {
        let a = RequestMeta::new("GET", "/a")
            .with_remote_addr("10.0.0.1")
            .with_user_agent("ua");
        let b = RequestMeta::new("POST", "/b")
            .with_remote_addr("10.0.0.1")
            .with_user_agent("ua");

        // Path and method do not participate
        assert_eq!(client_id(&a), client_id(&b));
    }

    #[test]
    fn test_user_agent_distinguishes_clients() {
        let a = RequestMeta::new("GET", "/").with_remote_addr("10.0.0.1").with_user_agent("a");
        let b = RequestMeta::new("GET", "/").with_remote_addr("10.0.0.1").with_user_agent("b");
        assert_ne!(client_id(&a), client_id(&b));
    }

    #[test]
    fn test_forwarded_for_takes_first_hop() {
        let meta = RequestMeta::new("GET", "/")
            .with_remote_addr("172.16.0.1")
            .with_forwarded_for(" 203.0.113.9 , 172.16.0.1");

        assert_eq!(meta.source_address(), "203.0.113.9");
        assert_eq!(meta.remote_address(), "172.16.0.1");

        let direct = RequestMeta::new("GET", "/")
            .with_remote_addr("203.0.113.9")
            .with_user_agent(UNKNOWN);
        assert_eq!(client_id(&meta), client_id(&direct));
    }

    #[test]
    fn test_missing_metadata_uses_placeholder() {
        let meta = RequestMeta::default();
        assert_eq!(meta.remote_address(), UNKNOWN);
        assert_eq!(meta.source_address(), UNKNOWN);
        assert_eq!(meta.user_agent(), UNKNOWN);

        let expected = hex::encode(Sha256::digest(b"unknown:unknown"));
        assert_eq!(client_id(&meta), &expected[..16]);
    }

    #[test]
    fn test_empty_forwarded_for_falls_back() {
        let meta = RequestMeta::new("GET", "/")
            .with_remote_addr("10.0.0.1")
            .with_forwarded_for("");
        assert_eq!(meta.source_address(), "10.0.0.1");
    }

    #[test]
    fn test_mask_client_id() {
        assert_eq!(mask_client_id("0123456789abcdef"), "01234567...");
        assert_eq!(mask_client_id("abc"), "abc...");
    }
}
