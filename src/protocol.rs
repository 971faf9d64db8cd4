//! Wire types for NDJSON communication with cohortd.
//!
//! Every message is one line of UTF-8 JSON terminated by `\n`. A unary
//! exchange is one request line out, one response line back; a streaming
//! subscription is one request line out, one handshake response line back,
//! then an unbounded sequence of stream item lines.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::PROTOCOL_VERSION;

/// NDJSON request from client to daemon.
///
/// # Example
/// ```json
/// {"v":1,"op":"send","args":{"group_id":"g_1","text":"hello","by":"user"}}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Protocol version the client speaks (currently 1). The daemon rejects
    /// versions it does not understand; the client never downgrades.
    pub v: u32,
    /// Operation name (e.g. "ping", "send", "events_stream")
    pub op: String,
    /// Operation arguments (flexible key-value map)
    #[serde(default)]
    pub args: HashMap<String, Value>,
}

/// NDJSON response from daemon to client.
///
/// Exactly one of `result`/`error` is meaningful, gated by `ok`.
///
/// # Example (success)
/// ```json
/// {"ok":true,"result":{"ipc_v":1,"capabilities":{"events_stream":true}}}
/// ```
///
/// # Example (rejection)
/// ```json
/// {"ok":false,"error":{"code":"missing_group_id","message":"group_id is required","details":{}}}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Success flag
    #[serde(default)]
    pub ok: bool,
    /// Result data (if successful)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error information (if rejected)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

/// Error details in a rejected response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error code (snake_case, e.g. "unknown_op", "missing_group_id")
    #[serde(default)]
    pub code: String,
    /// Human-readable error message
    #[serde(default)]
    pub message: String,
    /// Additional error details (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl Request {
    /// Create a new request for the current protocol version.
    pub fn new(op: impl Into<String>, args: HashMap<String, Value>) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            op: op.into(),
            args,
        }
    }

    /// Create a request with empty arguments.
    pub fn simple(op: impl Into<String>) -> Self {
        Self::new(op, HashMap::new())
    }

    /// Serialize to an NDJSON line (newline included).
    pub fn to_ndjson_line(&self) -> serde_json::Result<String> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{}\n", json))
    }

    /// Parse a request from an NDJSON line.
    pub fn from_ndjson_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

impl Response {
    /// Serialize to an NDJSON line (newline included).
    pub fn to_ndjson_line(&self) -> serde_json::Result<String> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{}\n", json))
    }

    /// Parse a response from an NDJSON line.
    pub fn from_ndjson_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }

    /// The `result` payload as an object, or an empty map.
    ///
    /// The daemon always returns an object result for successful calls;
    /// anything else is treated as absent rather than an error.
    pub fn result_object(&self) -> Map<String, Value> {
        match &self.result {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        }
    }
}

/// One item pushed by the daemon after a streaming handshake.
///
/// Tagged by the `t` field. Kinds other than `event` and `heartbeat` decode
/// as [`StreamItem::Other`] so that newer daemons can introduce item kinds
/// without breaking existing consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum StreamItem {
    /// A daemon event, e.g. a chat message or a group state change.
    Event {
        #[serde(default)]
        event: Value,
    },
    /// Periodic liveness signal. `ts` is an ISO 8601 timestamp.
    Heartbeat {
        #[serde(default)]
        ts: String,
    },
    /// Unrecognized item kind; safe to ignore.
    #[serde(other)]
    Other,
}

impl StreamItem {
    /// Parse the heartbeat timestamp, if this is a heartbeat with a valid
    /// RFC 3339 `ts`.
    pub fn heartbeat_ts(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            StreamItem::Heartbeat { ts } => DateTime::parse_from_rfc3339(ts).ok(),
            _ => None,
        }
    }
}

/// Decoded payload of the `ping` operation's result.
///
/// The basis for compatibility negotiation. Decoding is deliberately
/// lenient: a missing or malformed `ipc_v` reads as 0 and missing
/// `capabilities` as empty, so that negotiation against an old daemon fails
/// with a clear "incompatible" outcome instead of a decode error.
#[derive(Debug, Clone, PartialEq)]
pub struct PingInfo {
    /// IPC protocol version the daemon speaks (0 when unknown).
    pub ipc_v: i64,
    /// Capability flags advertised by the daemon. Values are kept as raw
    /// JSON; use [`PingInfo::capability`] for a truthiness check.
    pub capabilities: Map<String, Value>,
    /// The full `ping` result, including fields this struct does not model.
    pub raw: Map<String, Value>,
}

impl PingInfo {
    /// Decode from a `ping` result payload.
    pub fn from_result(result: Option<&Value>) -> Self {
        let raw = match result {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        let ipc_v = lenient_int(raw.get("ipc_v"));
        let capabilities = match raw.get("capabilities") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        Self {
            ipc_v,
            capabilities,
            raw,
        }
    }

    /// Whether the daemon advertises `name` with a truthy value.
    pub fn capability(&self, name: &str) -> bool {
        self.capabilities.get(name).is_some_and(truthy)
    }
}

/// Integer out of arbitrary JSON: numbers truncate, numeric strings parse,
/// booleans count as 0/1, everything else is 0.
fn lenient_int(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        Some(Value::Bool(b)) => *b as i64,
        _ => 0,
    }
}

/// JSON truthiness: false for `null`, `false`, `0`, `""`, `[]`, `{}`.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Error codes with protocol-level meaning to the client.
pub mod error_codes {
    /// The daemon does not recognize the requested operation. The
    /// compatibility negotiator treats this code — and only this code — as
    /// proof that an operation is unsupported.
    pub const UNKNOWN_OP: &str = "unknown_op";
}
