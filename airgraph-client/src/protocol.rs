//! Wire-level types for the Gremlin-style request/response protocol.
//!
//! Requests are identified by a [`RequestId`] and answered by one or more
//! response frames: zero or more partial frames (status 206) followed by
//! exactly one terminal frame carrying the final status and its attributes.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::TransportError;

/// Protocol status codes used by the client.
pub mod status {
    pub const SUCCESS: u16 = 200;
    pub const NO_CONTENT: u16 = 204;
    pub const PARTIAL_CONTENT: u16 = 206;
    pub const AUTHENTICATE: u16 = 407;
    pub const SERVER_ERROR: u16 = 500;
}

/// Status attribute names reported by Cosmos-style services.
pub mod attribute {
    pub const VENDOR_STATUS_CODE: &str = "x-ms-status-code";
    pub const REQUEST_CHARGE: &str = "x-ms-request-charge";
    pub const TOTAL_REQUEST_CHARGE: &str = "x-ms-total-request-charge";
    pub const SERVER_TIME_MS: &str = "x-ms-server-time-ms";
    pub const TOTAL_SERVER_TIME_MS: &str = "x-ms-total-server-time-ms";
    pub const RETRY_AFTER_MS: &str = "x-ms-retry-after-ms";
}

/// Unique identifier for one submitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Create a new random request ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Query text submitted to the service. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    text: String,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for Query {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Terminal status metadata (request charge, server latency, vendor code...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusAttributes(Map<String, Value>);

impl StatusAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Service-specific sub-code refining the protocol status code.
    pub fn vendor_status_code(&self) -> Option<i64> {
        let value = self.get(attribute::VENDOR_STATUS_CODE)?;
        match value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Request units charged for this response message.
    pub fn request_charge(&self) -> Option<f64> {
        self.number(attribute::REQUEST_CHARGE)
    }

    /// Request units charged for the whole request so far.
    pub fn total_request_charge(&self) -> Option<f64> {
        self.number(attribute::TOTAL_REQUEST_CHARGE)
    }

    pub fn server_time_ms(&self) -> Option<f64> {
        self.number(attribute::SERVER_TIME_MS)
    }

    pub fn total_server_time_ms(&self) -> Option<f64> {
        self.number(attribute::TOTAL_SERVER_TIME_MS)
    }

    /// Backoff suggested by the server for throttled requests.
    ///
    /// Accepts plain milliseconds or a `HH:MM:SS.fffffff` span.
    pub fn retry_after(&self) -> Option<Duration> {
        match self.get(attribute::RETRY_AFTER_MS)? {
            Value::Number(n) => millis_to_duration(n.as_f64()?),
            Value::String(s) => {
                let s = s.trim();
                match s.parse::<f64>() {
                    Ok(ms) => millis_to_duration(ms),
                    Err(_) => parse_span(s),
                }
            }
            _ => None,
        }
    }

    fn number(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

fn millis_to_duration(ms: f64) -> Option<Duration> {
    if !ms.is_finite() || ms < 0.0 {
        return None;
    }
    Some(Duration::from_micros((ms * 1000.0).round() as u64))
}

fn parse_span(s: &str) -> Option<Duration> {
    let mut parts = s.split(':');
    let (hours, minutes, seconds) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let hours: u64 = hours.parse().ok()?;
    let minutes: u64 = minutes.parse().ok()?;
    let (seconds, fraction) = seconds.split_once('.').unwrap_or((seconds, ""));
    let seconds: u64 = seconds.parse().ok()?;
    if !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    // Spans carry up to 7 fractional digits; pad or cut to nanoseconds.
    let mut digits: String = fraction.chars().take(9).collect();
    while digits.len() < 9 {
        digits.push('0');
    }
    let nanos: u32 = digits.parse().ok()?;
    let whole = hours
        .checked_mul(3600)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_add(seconds)?;
    Some(Duration::new(whole, nanos))
}

/// Final status carried by a response frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseStatus {
    pub code: u16,
    pub message: String,
    pub attributes: StatusAttributes,
}

impl ResponseStatus {
    pub fn new(code: u16) -> Self {
        Self {
            code,
            message: String::new(),
            attributes: StatusAttributes::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.code, status::SUCCESS | status::NO_CONTENT)
    }

    pub fn is_partial(&self) -> bool {
        self.code == status::PARTIAL_CONTENT
    }

    pub fn vendor_status_code(&self) -> Option<i64> {
        self.attributes.vendor_status_code()
    }
}

/// One decoded response message.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Partial {
        request_id: RequestId,
        records: Vec<Value>,
    },
    Terminal {
        request_id: RequestId,
        records: Vec<Value>,
        status: ResponseStatus,
    },
}

impl Frame {
    /// Build a frame from a decoded status; 206 is the only non-terminal code.
    pub fn from_parts(request_id: RequestId, records: Vec<Value>, status: ResponseStatus) -> Self {
        if status.is_partial() {
            Frame::Partial {
                request_id,
                records,
            }
        } else {
            Frame::Terminal {
                request_id,
                records,
                status,
            }
        }
    }

    pub fn request_id(&self) -> RequestId {
        match self {
            Frame::Partial { request_id, .. } | Frame::Terminal { request_id, .. } => *request_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Frame::Terminal { .. })
    }
}

/// Outbound request envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMessage {
    pub request_id: RequestId,
    pub op: String,
    pub processor: String,
    pub args: RequestArgs,
}

#[derive(Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gremlin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub aliases: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sasl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sasl_mechanism: Option<String>,
}

impl fmt::Debug for RequestArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestArgs")
            .field("gremlin", &self.gremlin)
            .field("language", &self.language)
            .field("aliases", &self.aliases)
            .field("sasl", &self.sasl.as_ref().map(|_| "<redacted>"))
            .field("sasl_mechanism", &self.sasl_mechanism)
            .finish()
    }
}

impl RequestMessage {
    /// Script evaluation request bound to the given traversal source.
    pub fn eval(request_id: RequestId, query: &Query, traversal_source: &str) -> Self {
        let mut aliases = BTreeMap::new();
        aliases.insert("g".to_string(), traversal_source.to_string());
        Self {
            request_id,
            op: "eval".to_string(),
            processor: String::new(),
            args: RequestArgs {
                gremlin: Some(query.text().to_string()),
                language: Some("gremlin-groovy".to_string()),
                aliases,
                ..RequestArgs::default()
            },
        }
    }

    /// SASL PLAIN authentication request (`\0principal\0secret`).
    pub fn authentication(request_id: RequestId, principal: &str, secret: &str) -> Self {
        let mut token = Vec::with_capacity(principal.len() + secret.len() + 2);
        token.push(0u8);
        token.extend_from_slice(principal.as_bytes());
        token.push(0u8);
        token.extend_from_slice(secret.as_bytes());
        Self {
            request_id,
            op: "authentication".to_string(),
            processor: String::new(),
            args: RequestArgs {
                sasl: Some(BASE64.encode(token)),
                sasl_mechanism: Some("PLAIN".to_string()),
                ..RequestArgs::default()
            },
        }
    }
}

/// Serialization format for the connection, injected at open time.
pub trait FrameCodec: Send + Sync {
    fn encode(&self, request: &RequestMessage) -> Result<String, TransportError>;

    fn decode(&self, payload: &str) -> Result<Frame, TransportError>;
}

/// Plain JSON envelopes, one message per transport unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    request_id: Option<RequestId>,
    status: WireStatus,
    #[serde(default)]
    result: Option<WireResult>,
}

#[derive(Deserialize)]
struct WireStatus {
    code: u16,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    attributes: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct WireResult {
    #[serde(default)]
    data: Value,
}

impl FrameCodec for JsonCodec {
    fn encode(&self, request: &RequestMessage) -> Result<String, TransportError> {
        serde_json::to_string(request)
            .map_err(|e| TransportError::Codec(format!("failed to encode request: {e}")))
    }

    fn decode(&self, payload: &str) -> Result<Frame, TransportError> {
        let response: WireResponse = serde_json::from_str(payload)
            .map_err(|e| TransportError::Codec(format!("invalid response frame: {e}")))?;
        let status = ResponseStatus {
            code: response.status.code,
            message: response.status.message.unwrap_or_default(),
            attributes: StatusAttributes(response.status.attributes.unwrap_or_default()),
        };
        let request_id = response.request_id.ok_or_else(|| {
            TransportError::Codec(format!(
                "response without request id (status {}: {})",
                status.code, status.message
            ))
        })?;
        let records = response
            .result
            .map(|result| into_records(result.data))
            .unwrap_or_default();
        Ok(Frame::from_parts(request_id, records, status))
    }
}

fn into_records(data: Value) -> Vec<Value> {
    match data {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        Value::Object(mut map) if map.get("@type").and_then(Value::as_str) == Some("g:List") => {
            match map.remove("@value") {
                Some(Value::Array(items)) => items,
                Some(Value::Null) | None => Vec::new(),
                Some(other) => vec![other],
            }
        }
        other => vec![other],
    }
}
