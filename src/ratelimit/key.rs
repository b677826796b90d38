//! Caller key derivation from request metadata.

use std::collections::HashMap;

use axum::http::HeaderMap;

/// Key used when no client address can be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Headers consulted for the client address, in priority order.
const CLIENT_IP_HEADERS: [&str; 3] = ["x-forwarded-for", "cf-connecting-ip", "x-real-ip"];

/// Read-only access to request headers by name.
pub trait HeaderSource {
    /// Value of the named header, matched case-insensitively.
    fn header(&self, name: &str) -> Option<&str>;
}

impl HeaderSource for HeaderMap {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|value| value.to_str().ok())
    }
}

impl HeaderSource for HashMap<String, String> {
    fn header(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Derive the client address key from proxy headers.
///
/// Uses the first entry of `x-forwarded-for`, then `cf-connecting-ip`, then
/// `x-real-ip`. Blank values are skipped. Falls back to `"unknown"`.
pub fn client_ip<H: HeaderSource + ?Sized>(headers: &H) -> String {
    CLIENT_IP_HEADERS
        .iter()
        .filter_map(|name| headers.header(name))
        .filter_map(|value| value.split(',').next())
        .map(str::trim)
        .find(|value| !value.is_empty())
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}

/// Composite key for per-user limits.
pub fn user_key(id: &str) -> String {
    format!("user:{}", id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_forwarded_for_first_entry() {
        let h = headers(&[
            ("X-Forwarded-For", "203.0.113.7, 10.0.0.1"),
            ("x-real-ip", "10.0.0.2"),
        ]);
        assert_eq!(client_ip(&h), "203.0.113.7");
    }

    #[test]
    fn test_fallback_order() {
        let h = headers(&[("cf-connecting-ip", "198.51.100.4"), ("x-real-ip", "10.0.0.2")]);
        assert_eq!(client_ip(&h), "198.51.100.4");

        let h = headers(&[("x-real-ip", "10.0.0.2")]);
        assert_eq!(client_ip(&h), "10.0.0.2");
    }

    #[test]
    fn test_blank_forwarded_for_skipped() {
        let h = headers(&[("x-forwarded-for", " "), ("x-real-ip", "10.0.0.2")]);
        assert_eq!(client_ip(&h), "10.0.0.2");
    }

    #[test]
    fn test_unknown_when_no_headers() {
        assert_eq!(client_ip(&HashMap::new()), UNKNOWN_CLIENT);
    }

    #[test]
    fn test_header_map_source() {
        let mut map = HeaderMap::new();
        map.insert("x-forwarded-for", HeaderValue::from_static("192.0.2.1"));
        assert_eq!(client_ip(&map), "192.0.2.1");
    }

    #[test]
    fn test_user_key() {
        assert_eq!(user_key("123"), "user:123");
    }
}
