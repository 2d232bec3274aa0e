//! Handshake metadata captured when a socket opens.

use std::collections::HashMap;

use axum::http::HeaderMap;
use serde_json::Value;

/// What a client presented while connecting: the handshake `auth` payload,
/// the upgrade request's query string, and its headers (names lowercased).
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    auth: Option<Value>,
    query: HashMap<String, String>,
    headers: HashMap<String, String>,
}

impl Handshake {
    pub fn new<I>(auth: Option<Value>, query: HashMap<String, String>, headers: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            auth,
            query,
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), value))
                .collect(),
        }
    }

    /// Capture the upgrade request. Header values that are not valid UTF-8
    /// are skipped.
    pub fn from_request(query: HashMap<String, String>, headers: &HeaderMap) -> Self {
        let headers = headers.iter().filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        });
        Self::new(None, query, headers)
    }

    /// Attach the `auth` payload from the client's connect frame.
    pub fn with_auth(mut self, auth: Option<Value>) -> Self {
        self.auth = auth;
        self
    }

    pub fn auth(&self) -> Option<&Value> {
        self.auth.as_ref()
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The bearer credential, by priority: `auth.token`, then the `token`
    /// query parameter, then the raw `authorization` header. Empty values
    /// are skipped. The header is passed through as-is, scheme included.
    pub fn bearer_token(&self) -> Option<&str> {
        let from_auth = self
            .auth
            .as_ref()
            .and_then(|auth| auth.get("token"))
            .and_then(Value::as_str);

        from_auth
            .filter(|t| !t.is_empty())
            .or_else(|| {
                self.query
                    .get("token")
                    .map(String::as_str)
                    .filter(|t| !t.is_empty())
            })
            .or_else(|| self.header("authorization").filter(|t| !t.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn headers(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn no_credential() {
        let hs = Handshake::default();
        assert_eq!(hs.bearer_token(), None);
    }

    #[test]
    fn auth_field_wins() {
        let hs = Handshake::new(
            Some(json!({"token": "from-auth"})),
            query(&[("token", "from-query")]),
            headers(&[("authorization", "from-header")]),
        );
        assert_eq!(hs.bearer_token(), Some("from-auth"));
    }

    #[test]
    fn query_beats_header() {
        let hs = Handshake::new(
            None,
            query(&[("token", "from-query")]),
            headers(&[("authorization", "from-header")]),
        );
        assert_eq!(hs.bearer_token(), Some("from-query"));
    }

    #[test]
    fn header_passed_through_raw() {
        let hs = Handshake::new(
            None,
            HashMap::new(),
            headers(&[("Authorization", "Bearer abc.def")]),
        );
        assert_eq!(hs.bearer_token(), Some("Bearer abc.def"));
    }

    #[test]
    fn empty_values_fall_through() {
        let hs = Handshake::new(
            Some(json!({"token": ""})),
            query(&[("token", "")]),
            headers(&[("authorization", "from-header")]),
        );
        assert_eq!(hs.bearer_token(), Some("from-header"));
    }

    #[test]
    fn non_string_auth_token_ignored() {
        let hs = Handshake::new(
            Some(json!({"token": 12345})),
            query(&[("token", "from-query")]),
            Vec::new(),
        );
        assert_eq!(hs.bearer_token(), Some("from-query"));
    }

    #[test]
    fn from_request_lowercases_header_names() {
        let mut map = HeaderMap::new();
        map.insert("Authorization", HeaderValue::from_static("tok"));
        map.insert("X-Request-Id", HeaderValue::from_static("r-1"));
        let hs = Handshake::from_request(HashMap::new(), &map);
        assert_eq!(hs.header("x-request-id"), Some("r-1"));
        assert_eq!(hs.header("X-REQUEST-ID"), Some("r-1"));
        assert_eq!(hs.bearer_token(), Some("tok"));
    }

    #[test]
    fn with_auth_attaches_payload() {
        let hs = Handshake::default().with_auth(Some(json!({"token": "late"})));
        assert_eq!(hs.auth(), Some(&json!({"token": "late"})));
        assert_eq!(hs.bearer_token(), Some("late"));
    }

    #[test]
    fn accessors_expose_captured_request() {
        let hs = Handshake::new(
            None,
            query(&[("room", "lobby")]),
            headers(&[("User-Agent", "quill-test")]),
        );
        assert_eq!(hs.auth(), None);
        assert_eq!(hs.query_param("room"), Some("lobby"));
        assert_eq!(hs.query_param("missing"), None);
        assert_eq!(hs.header("user-agent"), Some("quill-test"));
    }
}
