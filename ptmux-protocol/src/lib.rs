//! Wire types and frame codec for the ptmux control transport.
//!
//! Every frame on the transport has the shape:
//!
//! ```text
//! 4-byte big-endian unsigned length L
//! 1-byte kind           (0x01 = JSON control, 0x02 = BINARY payload)
//! L-1 bytes payload
//! ```
//!
//! Control frames carry a single UTF-8 JSON object: either a [`Request`], a
//! [`Response`], or an [`Event`]. Binary frames carry raw session bytes and
//! always follow a JSON header frame that announces their length.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod codec;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default cap on a single frame's length prefix. A frame whose declared
/// length exceeds this closes the transport with `frame_too_large`.
pub const DEFAULT_MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// Tag byte distinguishing JSON control frames from raw binary frames.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameKind {
    Control = 0x01,
    Binary = 0x02,
}

impl TryFrom<u8> for FrameKind {
    type Error = anyhow::Error;

    fn try_from(v: u8) -> anyhow::Result<Self> {
        match v {
            0x01 => Ok(FrameKind::Control),
            0x02 => Ok(FrameKind::Binary),
            other => Err(anyhow::anyhow!("unknown frame kind tag {}", other)),
        }
    }
}

/// Error kinds exchanged over the wire. Kept as a typed, exhaustively
/// matchable enum rather than a bag of strings so the daemon and client
/// never drift on spelling.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    SessionExited,
    InvalidDimensions,
    SpawnFailed,
    UnknownOp,
    FrameTooLarge,
    Timeout,
    ProtocolViolation,
    IoError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::SessionExited => "session_exited",
            ErrorKind::InvalidDimensions => "invalid_dimensions",
            ErrorKind::SpawnFailed => "spawn_failed",
            ErrorKind::UnknownOp => "unknown_op",
            ErrorKind::FrameTooLarge => "frame_too_large",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ProtocolViolation => "protocol_violation",
            ErrorKind::IoError => "io_error",
        };
        write!(f, "{s}")
    }
}

impl std::error::Error for ErrorKind {}

/// The operation-specific fields of a request. Internally tagged on `op` so
/// the wire shape is `{"op": "create", "request_id": 1, ...fields}`,
/// rather than serde's externally-tagged default.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RequestOp {
    Create {
        name: String,
        cols: u16,
        rows: u16,
        #[serde(default)]
        cwd: Option<String>,
        #[serde(default)]
        argv: Option<Vec<String>>,
        #[serde(default)]
        env: Option<Vec<(String, String)>>,
    },
    List,
    Attach {
        id: String,
    },
    Detach {
        id: String,
    },
    Write {
        id: String,
        len: u32,
    },
    Resize {
        id: String,
        cols: u16,
        rows: u16,
    },
    Kill {
        id: String,
        #[serde(default)]
        signal: Option<String>,
    },
    History {
        id: String,
    },
}

impl RequestOp {
    pub fn name(&self) -> &'static str {
        match self {
            RequestOp::Create { .. } => "create",
            RequestOp::List => "list",
            RequestOp::Attach { .. } => "attach",
            RequestOp::Detach { .. } => "detach",
            RequestOp::Write { .. } => "write",
            RequestOp::Resize { .. } => "resize",
            RequestOp::Kill { .. } => "kill",
            RequestOp::History { .. } => "history",
        }
    }
}

/// A request frame. `request_id` is monotonically increasing per client and
/// is echoed verbatim on the matching response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Request {
    pub request_id: u64,
    #[serde(flatten)]
    pub op: RequestOp,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// A response frame. Successful operation-specific fields are flattened into
/// `fields`; the caller knows the shape to expect because it knows which
/// request it sent.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Response {
    pub request_id: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Response {
    pub fn ok(request_id: u64, fields: serde_json::Map<String, serde_json::Value>) -> Self {
        Response { request_id, ok: true, error: None, message: None, fields }
    }

    pub fn err(request_id: u64, error: ErrorKind, message: impl Into<String>) -> Self {
        Response {
            request_id,
            ok: false,
            error: Some(error),
            message: Some(message.into()),
            fields: serde_json::Map::new(),
        }
    }

    /// Decode the flattened success fields into a concrete result type.
    pub fn into_result<T>(self) -> anyhow::Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        if !self.ok {
            return Err(anyhow::anyhow!(
                "{}",
                self.message.unwrap_or_else(|| "request failed".to_string())
            ));
        }
        let value = serde_json::Value::Object(self.fields);
        Ok(serde_json::from_value(value)?)
    }
}

/// An asynchronous event frame. Carries no `request_id`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Output { session_id: String, len: u32 },
    Bell { session_id: String },
    Exit { session_id: String, exit_code: i32 },
    Resync { session_id: String, dropped_bytes: u64 },
}

impl Event {
    pub fn session_id(&self) -> &str {
        match self {
            Event::Output { session_id, .. }
            | Event::Bell { session_id }
            | Event::Exit { session_id, .. }
            | Event::Resync { session_id, .. } => session_id,
        }
    }
}

/// Any JSON control frame: a request, a response, or an event. Used on the
/// read side, which must distinguish the three before it knows which type
/// to fully decode into.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlFrame {
    Request(Request),
    Response(Response),
    Event(Event),
}

/// Result fields for a successful `create`/`attach` descriptor, shared by
/// both the `create` and `list` replies.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub id: String,
    pub name: String,
    pub alive: bool,
    pub cols: u16,
    pub rows: u16,
    pub cwd: String,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateResult {
    pub id: String,
    pub cols: u16,
    pub rows: u16,
    pub cwd: String,
    pub created_at: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListResult {
    pub sessions: Vec<SessionDescriptor>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttachResult {
    pub alive: bool,
    pub cols: u16,
    pub rows: u16,
    pub history_len: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryResult {
    pub len: u32,
}
