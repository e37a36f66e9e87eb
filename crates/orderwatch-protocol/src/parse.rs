//! Parsing retail order API responses.
//!
//! Responses are wrapped in an envelope whose `data` member is the
//! observation. Order fields are read through [`OrderView`], which
//! navigates the dynamic value without assuming any field exists.

use orderwatch_core::MonitorKey;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Status name used when the API omits `orderStatusName`.
pub const UNKNOWN_STATUS_NAME: &str = "未知状态";

/// Errors produced while reading API payloads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The body is not valid JSON.
    #[error("malformed JSON: {0}")]
    Malformed(String),

    /// The envelope has no `data` member (or it is null).
    ///
    /// `context` carries the envelope's `code` and `message`, which
    /// usually explain why (an expired token, a rate limit).
    #[error("response has no data field{context}")]
    MissingData { context: String },

    /// A stored request template cannot be used.
    #[error("invalid request template: {0}")]
    InvalidTemplate(String),
}

// ============================================================================
// Envelope
// ============================================================================

/// Raw response envelope from the retail API.
///
/// Only `data` is required for monitoring; `code` and `message` end up in
/// the error when it is missing.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEnvelope {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl RawEnvelope {
    /// Parses a raw response body.
    pub fn parse(body: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(body).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Extracts the observation, rejecting an absent or null `data`.
    pub fn into_observation(self) -> Result<Value, ProtocolError> {
        if matches!(self.data, None | Some(Value::Null)) {
            return Err(ProtocolError::MissingData {
                context: self.describe_failure(),
            });
        }
        self.data.ok_or_else(|| ProtocolError::MissingData {
            context: String::new(),
        })
    }

    /// Renders `code` and `message` as " (code 401: token expired)".
    fn describe_failure(&self) -> String {
        let message = self.message.as_deref().map(str::trim).filter(|m| !m.is_empty());
        match (self.code, message) {
            (Some(code), Some(message)) => format!(" (code {code}: {message})"),
            (Some(code), None) => format!(" (code {code})"),
            (None, Some(message)) => format!(" ({message})"),
            (None, None) => String::new(),
        }
    }
}

/// Parses a body and returns its observation in one step.
pub fn parse_observation(body: &str) -> Result<Value, ProtocolError> {
    RawEnvelope::parse(body)?.into_observation()
}

// ============================================================================
// Order View
// ============================================================================

/// Status fields extracted from an order observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusInfo {
    pub code: i64,
    pub name: String,
}

/// Read-only navigation over an order observation.
#[derive(Debug, Clone, Copy)]
pub struct OrderView<'a> {
    data: &'a Value,
}

impl<'a> OrderView<'a> {
    pub fn new(data: &'a Value) -> Self {
        Self { data }
    }

    /// The order detail object, used as the auxiliary classification record.
    pub fn detail(&self) -> Option<&'a Value> {
        self.data.get("orderDetailDto").filter(|v| v.is_object())
    }

    /// Order number as text (the API sometimes sends it as a number).
    pub fn order_number(&self) -> Option<String> {
        match self.detail()?.get("orderNumber")? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Key shared by every trigger path observing this order.
    pub fn monitor_key(&self) -> MonitorKey {
        self.order_number()
            .map(|number| MonitorKey::for_order(&number))
            .unwrap_or_default()
    }

    /// Status code and name.
    ///
    /// Reads `orderDetailDto.statusInfo` first and falls back to a
    /// top-level `status` code.
    pub fn status(&self) -> Option<StatusInfo> {
        if let Some(info) = self.data.pointer("/orderDetailDto/statusInfo") {
            if let Some(code) = info.get("orderStatus").and_then(status_code) {
                let name = info
                    .get("orderStatusName")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .unwrap_or(UNKNOWN_STATUS_NAME);
                return Some(StatusInfo {
                    code,
                    name: name.to_string(),
                });
            }
        }

        let code = self.data.get("status").and_then(status_code)?;
        Some(StatusInfo {
            code,
            name: UNKNOWN_STATUS_NAME.to_string(),
        })
    }
}

/// Reads a status code sent either as a number or as numeric text.
///
/// Integral floats (`2605.0`) are accepted; fractional values are not.
pub fn status_code(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        Value::String(s) => {
            let s = s.trim();
            s.parse().ok().or_else(|| s.parse().ok().and_then(integral))
        }
        _ => None,
    }
}

fn integral(value: f64) -> Option<i64> {
    let in_range = value >= i64::MIN as f64 && value < i64::MAX as f64;
    (value.fract() == 0.0 && in_range).then_some(value as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order_body(code: i64) -> String {
        json!({
            "code": 0,
            "message": "ok",
            "data": {
                "orderDetailDto": {
                    "orderNumber": "E100",
                    "statusInfo": {"orderStatus": code, "orderStatusName": "生产中"}
                }
            }
        })
        .to_string()
    }

    #[test]
    fn test_parse_observation() {
        let data = parse_observation(&order_body(2520)).unwrap();
        let view = OrderView::new(&data);
        assert_eq!(view.order_number().as_deref(), Some("E100"));
        assert_eq!(view.monitor_key().as_str(), "order:E100");
        assert_eq!(
            view.status(),
            Some(StatusInfo {
                code: 2520,
                name: "生产中".to_string()
            })
        );
    }

    #[test]
    fn test_malformed_body() {
        assert!(matches!(
            parse_observation("{not json"),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_missing_or_null_data() {
        assert!(matches!(
            parse_observation(r#"{"code": 0}"#),
            Err(ProtocolError::MissingData { .. })
        ));
        let err = parse_observation(r#"{"data": null}"#).unwrap_err();
        assert_eq!(err.to_string(), "response has no data field");
    }

    #[test]
    fn test_missing_data_keeps_envelope_context() {
        let err = parse_observation(r#"{"code": 401, "message": "token expired"}"#).unwrap_err();
        assert_eq!(
            err.to_string(),
            "response has no data field (code 401: token expired)"
        );

        let err = parse_observation(r#"{"code": 0, "message": " "}"#).unwrap_err();
        assert_eq!(err.to_string(), "response has no data field (code 0)");
    }

    #[test]
    fn test_status_code_forms() {
        assert_eq!(status_code(&json!(2605)), Some(2605));
        assert_eq!(status_code(&json!(2605.0)), Some(2605));
        assert_eq!(status_code(&json!(" 2520 ")), Some(2520));
        assert_eq!(status_code(&json!("3000.0")), Some(3000));
        assert_eq!(status_code(&json!(2605.5)), None);
        assert_eq!(status_code(&json!(true)), None);
    }

    #[test]
    fn test_float_status_is_read() {
        let data = json!({
            "orderDetailDto": {"orderNumber": "E1", "statusInfo": {"orderStatus": 2605.0}}
        });
        assert_eq!(OrderView::new(&data).status().map(|s| s.code), Some(2605));
    }

    #[test]
    fn test_top_level_status_fallback() {
        let data = json!({"status": "2605"});
        let view = OrderView::new(&data);
        assert_eq!(view.status().map(|s| s.code), Some(2605));
        assert_eq!(view.monitor_key().as_str(), "order");
    }

    #[test]
    fn test_numeric_order_number_and_missing_name() {
        let data = json!({
            "orderDetailDto": {"orderNumber": 12345, "statusInfo": {"orderStatus": 3000}}
        });
        let view = OrderView::new(&data);
        assert_eq!(view.order_number().as_deref(), Some("12345"));
        assert_eq!(view.status().map(|s| s.name), Some(UNKNOWN_STATUS_NAME.to_string()));
    }

    #[test]
    fn test_no_status() {
        let data = json!({"buttons": []});
        assert_eq!(OrderView::new(&data).status(), None);
        assert!(OrderView::new(&data).detail().is_none());
    }
}
