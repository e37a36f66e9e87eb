//! Captured request templates for scheduled replay.
//!
//! The live path saves the app's own order request (URL, method, headers
//! and body) so the scheduler can re-issue it later. Headers are replayed
//! verbatim apart from transport-level ones the HTTP client manages.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProtocolError;

/// URL fragment identifying the order detail endpoint.
pub const DEFAULT_ENDPOINT_PATTERN: &str = "api.retail.xiaomiev.com/mtop/carlife/product/order";

/// Method used when the captured request did not record one.
pub const DEFAULT_METHOD: &str = "POST";

/// Headers dropped on replay; the HTTP client sets its own.
const TRANSPORT_HEADERS: &[&str] = &[
    "content-length",
    "host",
    "connection",
    "accept-encoding",
    "transfer-encoding",
];

/// Returns true if `url` belongs to the monitored endpoint.
pub fn endpoint_matches(url: &str, pattern: &str) -> bool {
    !pattern.is_empty() && url.contains(pattern)
}

/// A request captured on the live path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedRequest {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
    pub captured_at: DateTime<Utc>,
}

fn default_method() -> String {
    DEFAULT_METHOD.to_string()
}

impl CapturedRequest {
    /// Captures a request, defaulting an empty method to POST.
    pub fn new(
        url: impl Into<String>,
        method: Option<&str>,
        headers: BTreeMap<String, String>,
        body: impl Into<String>,
    ) -> Self {
        let method = method
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_ascii_uppercase)
            .unwrap_or_else(default_method);
        Self {
            url: url.into(),
            method,
            headers,
            body: body.into(),
            captured_at: Utc::now(),
        }
    }

    /// Checks the template is usable for replay.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.url.trim().is_empty() {
            return Err(ProtocolError::InvalidTemplate("empty URL".to_string()));
        }
        if !(self.url.starts_with("https://") || self.url.starts_with("http://")) {
            return Err(ProtocolError::InvalidTemplate(format!(
                "unsupported URL scheme: {}",
                self.url
            )));
        }
        Ok(())
    }

    /// Headers to send on replay.
    pub fn replay_headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .filter(|(name, _)| !TRANSPORT_HEADERS.contains(&name.to_ascii_lowercase().as_str()))
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Serializes for the key-value store.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::InvalidTemplate(e.to_string()))
    }

    /// Reads a template from the key-value store.
    pub fn from_json(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(|e| ProtocolError::InvalidTemplate(e.to_string()))
    }
}

/// Parses a JSON header object; non-string values are stringified.
pub fn parse_headers(raw: &str) -> Result<BTreeMap<String, String>, ProtocolError> {
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let value: Value =
        serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(ProtocolError::InvalidTemplate(
            "headers must be a JSON object".to_string(),
        ));
    };
    Ok(map
        .into_iter()
        .map(|(name, value)| {
            let text = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (name, text)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers() -> BTreeMap<String, String> {
        parse_headers(
            r#"{"Cookie": "serviceToken=abc", "Content-Length": "42", "Host": "x", "X-Count": 3}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_endpoint_matches() {
        let url = "https://api.retail.xiaomiev.com/mtop/carlife/product/order/detail";
        assert!(endpoint_matches(url, DEFAULT_ENDPOINT_PATTERN));
        assert!(!endpoint_matches("https://example.com/", DEFAULT_ENDPOINT_PATTERN));
        assert!(!endpoint_matches(url, ""));
    }

    #[test]
    fn test_method_defaults_to_post() {
        let req = CapturedRequest::new("https://a/b", None, BTreeMap::new(), "");
        assert_eq!(req.method, "POST");
        let req = CapturedRequest::new("https://a/b", Some(" get "), BTreeMap::new(), "");
        assert_eq!(req.method, "GET");
    }

    #[test]
    fn test_replay_headers_skip_transport_headers() {
        let req = CapturedRequest::new("https://a/b", None, headers(), "[]");
        let names: Vec<&str> = req.replay_headers().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Cookie", "X-Count"]);
        assert_eq!(req.headers.get("X-Count").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_validate() {
        assert!(CapturedRequest::new("https://a/b", None, BTreeMap::new(), "")
            .validate()
            .is_ok());
        assert!(CapturedRequest::new("", None, BTreeMap::new(), "").validate().is_err());
        assert!(CapturedRequest::new("ftp://a", None, BTreeMap::new(), "")
            .validate()
            .is_err());
    }

    #[test]
    fn test_json_round_trip_and_defaults() {
        let req = CapturedRequest::new("https://a/b", Some("POST"), headers(), "{\"id\":1}");
        let back = CapturedRequest::from_json(&req.to_json().unwrap()).unwrap();
        assert_eq!(back, req);

        let raw = r#"{"url": "https://a", "captured_at": "2024-05-01T00:00:00Z"}"#;
        let minimal = CapturedRequest::from_json(raw).unwrap();
        assert_eq!(minimal.method, DEFAULT_METHOD);
        assert!(minimal.headers.is_empty());
    }

    #[test]
    fn test_parse_headers_rejects_non_object() {
        assert!(parse_headers("[1,2]").is_err());
        assert!(parse_headers("").unwrap().is_empty());
    }
}
