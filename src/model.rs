//! Normalized request/response value objects.
//!
//! `RequestMessage` is built once per inbound request by the HTTP transport
//! and never mutated afterwards; `ResponseMessage` is built once by the
//! response generator and handed back to the transport to write to the wire.

use crate::collections::OrderedMultiMap;
use chrono::{DateTime, Utc};
use std::time::Instant;

/// HTTP headers the transport computes itself; any value a mapping sets for
/// these is dropped when the response is written to the wire.
pub const RESERVED_RESPONSE_HEADERS: &[&str] = &[
    "transfer-encoding",
    "content-length",
    "keep-alive",
    "connection",
    "upgrade",
    "proxy-connection",
];

/// Methods whose request body is coerced to empty before matching.
const BODYLESS_METHODS: &[&str] = &["GET", "HEAD", "TRACE"];

/// Monotonic + wall-clock timestamp pair, per the data model.
#[derive(Debug, Clone, Copy)]
pub struct Timestamp {
    pub monotonic: Instant,
    pub wall: DateTime<Utc>,
}

impl Timestamp {
    pub fn now() -> Self {
        Self {
            monotonic: Instant::now(),
            wall: Utc::now(),
        }
    }
}

/// The three co-resident views of a request/response body.
#[derive(Debug, Clone, Default)]
pub struct BodyViews {
    pub raw: Vec<u8>,
    pub text: Option<String>,
    pub json: Option<serde_json::Value>,
}

impl BodyViews {
    pub fn from_bytes(raw: Vec<u8>) -> Self {
        let text = String::from_utf8(raw.clone()).ok();
        // Always attempt a best-effort parse, regardless of declared
        // content type: some stubs post JSON without declaring it, and
        // JsonPath/JsonPartial matchers should still see it.
        let json = text.as_deref().and_then(|t| serde_json::from_str(t).ok());
        Self { raw, text, json }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

/// The normalized view of one inbound HTTP request. Immutable once built.
#[derive(Debug, Clone)]
pub struct RequestMessage {
    pub absolute_url: String,
    pub path: String,
    pub method: String,
    pub headers: OrderedMultiMap,
    pub cookies: std::collections::HashMap<String, String>,
    pub query: OrderedMultiMap,
    pub body: BodyViews,
    pub client_ip: String,
    pub timestamp: Timestamp,
}

impl RequestMessage {
    /// Build a normalized request, applying the body-presence rule: for
    /// GET/HEAD/TRACE the body is coerced to empty *before* anything else
    /// (including matching) ever sees it.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        absolute_url: String,
        path: String,
        method: String,
        headers: OrderedMultiMap,
        query: OrderedMultiMap,
        raw_body: Vec<u8>,
        client_ip: String,
    ) -> Self {
        let method = method.to_uppercase();
        let cookies = headers
            .get_all("cookie")
            .into_iter()
            .flat_map(|v| crate::collections::parse_cookies(v).into_iter())
            .collect();

        let raw_body = if BODYLESS_METHODS.contains(&method.as_str()) {
            Vec::new()
        } else {
            raw_body
        };

        let body = BodyViews::from_bytes(raw_body);

        Self {
            absolute_url,
            path,
            method,
            headers,
            cookies,
            query,
            body,
            client_ip,
            timestamp: Timestamp::now(),
        }
    }
}

/// Deliberate malformed/truncated response behavior, applied in place of a
/// normal body and bypassing the usual header-emission rules.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FaultDirective {
    /// Write `bytes` bytes of the real body then close the connection.
    AbortAfterBytes { bytes: usize },
    /// Close the connection mid-body with an invalid chunk trailer.
    MalformedResponse,
    /// Send headers only, no body, then close.
    EmptyResponse,
}

/// One of the possible response body representations.
#[derive(Debug, Clone)]
pub enum ResponseBody {
    Empty,
    Raw(Vec<u8>),
    Text(String),
    Json(serde_json::Value),
    File(std::path::PathBuf),
    Proxied(Vec<u8>),
}

impl ResponseBody {
    pub fn to_bytes(&self) -> std::io::Result<Vec<u8>> {
        match self {
            ResponseBody::Empty => Ok(Vec::new()),
            ResponseBody::Raw(b) | ResponseBody::Proxied(b) => Ok(b.clone()),
            ResponseBody::Text(s) => Ok(s.clone().into_bytes()),
            ResponseBody::Json(v) => Ok(serde_json::to_vec(v).unwrap_or_default()),
            ResponseBody::File(path) => std::fs::read(path),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ResponseBody::Empty)
    }
}

/// A response built by the response generator, ready to be written to the
/// wire by the HTTP transport (which applies `RESERVED_RESPONSE_HEADERS`).
#[derive(Debug, Clone)]
pub struct ResponseMessage {
    pub status: u16,
    pub headers: OrderedMultiMap,
    pub body: ResponseBody,
    pub delay: Option<std::time::Duration>,
    pub fault: Option<FaultDirective>,
}

impl Default for ResponseMessage {
    fn default() -> Self {
        Self {
            status: 200,
            headers: OrderedMultiMap::new(true),
            body: ResponseBody::Empty,
            delay: None,
            fault: None,
        }
    }
}

impl ResponseMessage {
    pub fn not_found() -> Self {
        Self {
            status: 404,
            headers: OrderedMultiMap::new(true),
            body: ResponseBody::Empty,
            delay: None,
            fault: None,
        }
    }

    /// Headers as they should actually be written to the wire: reserved,
    /// transport-owned headers are stripped regardless of what a mapping set.
    pub fn wire_headers(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .filter(|(k, _)| !RESERVED_RESPONSE_HEADERS.contains(&k.to_ascii_lowercase().as_str()))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> OrderedMultiMap {
        let mut h = OrderedMultiMap::new(true);
        for (k, v) in pairs {
            h.push(*k, *v);
        }
        h
    }

    #[test]
    fn get_body_is_stripped_before_matching() {
        let req = RequestMessage::new(
            "http://x/foo?x=1".into(),
            "/foo".into(),
            "get".into(),
            headers(&[]),
            OrderedMultiMap::new(false),
            b"hello".to_vec(),
            "127.0.0.1".into(),
        );
        assert_eq!(req.method, "GET");
        assert!(req.body.is_empty());
    }

    #[test]
    fn post_body_is_retained() {
        let req = RequestMessage::new(
            "http://x/foo".into(),
            "/foo".into(),
            "POST".into(),
            headers(&[("Content-Type", "application/json")]),
            OrderedMultiMap::new(false),
            br#"{"a":1}"#.to_vec(),
            "127.0.0.1".into(),
        );
        assert_eq!(req.body.raw, br#"{"a":1}"#);
        assert_eq!(req.body.json, Some(serde_json::json!({"a": 1})));
    }

    #[test]
    fn reserved_headers_are_stripped_from_wire_output() {
        let mut resp = ResponseMessage::default();
        resp.headers.push("Transfer-Encoding", "chunked");
        resp.headers.push("X-Custom", "keep-me");
        let wire = resp.wire_headers();
        assert!(wire.iter().all(|(k, _)| k != "Transfer-Encoding"));
        assert!(wire.iter().any(|(k, v)| k == "X-Custom" && v == "keep-me"));
    }
}
