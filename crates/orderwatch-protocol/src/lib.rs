//! orderwatch Protocol - Retail order API payloads
//!
//! This crate provides parsing for the order API responses observed by
//! both trigger paths (live interception and scheduled replay), and the
//! request template that lets the scheduler replay the app's request.

pub mod parse;
pub mod template;

pub use parse::{
    parse_observation, status_code, OrderView, ProtocolError, RawEnvelope, StatusInfo,
};
pub use template::{endpoint_matches, parse_headers, CapturedRequest, DEFAULT_ENDPOINT_PATTERN};
