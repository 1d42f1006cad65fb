//! Jupyter wire messages
//!
//! A frame is decoded in two steps: the envelope is read first to learn the
//! message type, then the content is decoded into the payload for that type.
//! Only the payloads the executor consumes are decoded in full; every other
//! recognized type passes through with its envelope only.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use strum::{EnumIter, EnumString, FromRepr, IntoStaticStr};
use thiserror::Error;
use uuid::Uuid;

/// Protocol version stamped on outgoing requests.
pub const PROTOCOL_VERSION: &str = "5.3";

/// Wire form of an enumeration value that has no name.
pub const INVALID: &str = "invalid";

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid msg_type: {0}")]
    InvalidMsgType(String),

    #[error("invalid channel: {0}")]
    InvalidChannel(String),

    #[error("invalid execution state: {0}")]
    InvalidState(String),

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Unknown enumeration text, as opposed to a structurally broken frame.
    pub fn is_invalid(&self) -> bool {
        !matches!(self, ProtocolError::Malformed(_))
    }
}

/// Implements the text codec shared by the wire enumerations.
macro_rules! wire_enum {
    ($ty:ident, $invalid:ident) => {
        impl $ty {
            /// Wire form of the value.
            pub fn as_str(self) -> &'static str {
                self.into()
            }

            /// Wire form of a raw discriminant, [`INVALID`] when out of range.
            pub fn name_of(code: u8) -> &'static str {
                Self::from_repr(code).map_or(INVALID, Self::as_str)
            }

            /// Decode the wire form, ignoring ASCII case.
            pub fn decode(text: &str) -> Result<Self, ProtocolError> {
                text.parse()
                    .map_err(|_| ProtocolError::$invalid(text.to_string()))
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let text = String::deserialize(deserializer)?;
                Self::decode(&text).map_err(serde::de::Error::custom)
            }
        }
    };
}

/// Type of a message, carried in `header.msg_type`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, EnumString, IntoStaticStr, EnumIter, FromRepr,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[repr(u8)]
pub enum MsgType {
    ExecuteRequest,
    ExecuteReply,
    InspectRequest,
    InspectReply,
    CompleteRequest,
    CompleteReply,
    HistoryRequest,
    HistoryReply,
    IsCompleteRequest,
    IsCompleteReply,
    ConnectRequest,
    ConnectReply,
    CommInfoRequest,
    CommInfoReply,
    KernelInfoRequest,
    KernelInfoReply,
    ShutdownRequest,
    ShutdownReply,
    InterruptRequest,
    InterruptReply,
    DebugRequest,
    DebugReply,
    Stream,
    DisplayData,
    UpdateDisplayData,
    ExecuteInput,
    ExecuteResult,
    Error,
    Status,
    ClearOutput,
    DebugEvent,
    InputRequest,
    InputReply,
    CommOpen,
    CommMsg,
    CommClose,
}

wire_enum!(MsgType, InvalidMsgType);

/// Socket a message travels on inside the kernel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, EnumString, IntoStaticStr, EnumIter, FromRepr,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[repr(u8)]
pub enum Channel {
    Shell,
    Iopub,
    Stdin,
    Control,
    Heartbeat,
}

wire_enum!(Channel, InvalidChannel);

/// Activity phase reported by `status` messages.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, EnumString, IntoStaticStr, EnumIter, FromRepr,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[repr(u8)]
pub enum ExecutionState {
    Starting,
    Idle,
    Busy,
    Terminating,
    Restarting,
    #[strum(serialize = "autorestarting")]
    AutoRestarting,
    Dead,
    Connected,
    Connecting,
    Disconnected,
    Initializing,
}

wire_enum!(ExecutionState, InvalidState);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub msg_id: String,
    pub msg_type: MsgType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

/// Header of the request a message answers. Empty (`{}`) on requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_type: Option<MsgType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub header: Header,
    pub parent_header: ParentHeader,
    pub channel: Option<Channel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExecuteReply {
    pub status: String,
    #[serde(default)]
    pub execution_count: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StreamContent {
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorContent {
    #[serde(default)]
    pub ename: String,
    #[serde(default)]
    pub evalue: String,
    #[serde(default)]
    pub traceback: Vec<String>,
}

/// Content of `display_data` and `execute_result` messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DisplayData {
    /// MIME-keyed representations. Ordered by key so parts come out in a
    /// stable order.
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct StatusContent {
    pub execution_state: ExecutionState,
}

/// One representation of a display payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MimePart {
    Text(String),
    Binary(Vec<u8>),
}

impl DisplayData {
    /// Representations in ascending MIME order.
    ///
    /// `text/*` parts are returned verbatim. Anything else is binary: string
    /// values carry base64 on the wire and are decoded (falling back to the
    /// raw string bytes), structured values are serialized.
    pub fn parts(&self) -> impl Iterator<Item = (&str, MimePart)> + '_ {
        self.data.iter().map(|(mime, value)| {
            let part = if is_text(mime) {
                MimePart::Text(text_of(value))
            } else {
                MimePart::Binary(bytes_of(value))
            };
            (mime.as_str(), part)
        })
    }
}

/// Whether the primary type of a MIME type is `text`.
pub fn is_text(mime: &str) -> bool {
    mime.split('/').next() == Some("text")
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(lines) => lines.iter().filter_map(Value::as_str).collect(),
        other => other.to_string(),
    }
}

fn bytes_of(value: &Value) -> Vec<u8> {
    match value {
        Value::String(text) => {
            // Kernels may wrap base64 output at a fixed column.
            let packed: String = text.split_ascii_whitespace().collect();
            STANDARD
                .decode(packed)
                .unwrap_or_else(|_| text.clone().into_bytes())
        }
        other => other.to_string().into_bytes(),
    }
}

/// Payload of a decoded message, keyed by its type.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    ExecuteReply(ExecuteReply),
    Stream(StreamContent),
    Error(ErrorContent),
    DisplayData(DisplayData),
    ExecuteResult(DisplayData),
    Status(StatusContent),
    /// Recognized type whose content is not needed.
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub envelope: Envelope,
    pub content: Content,
}

#[derive(Deserialize)]
struct RawHeader {
    msg_id: String,
    msg_type: String,
    #[serde(default)]
    session: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    version: String,
}

#[derive(Deserialize)]
struct RawFrame {
    header: RawHeader,
    #[serde(default)]
    parent_header: Option<ParentHeader>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    content: Value,
}

impl Message {
    /// Decode one frame.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let raw: RawFrame = serde_json::from_slice(frame)?;

        let msg_type = MsgType::decode(&raw.header.msg_type)?;
        let channel = raw.channel.as_deref().map(Channel::decode).transpose()?;

        let content = match msg_type {
            MsgType::ExecuteReply => Content::ExecuteReply(serde_json::from_value(raw.content)?),
            MsgType::Stream => Content::Stream(serde_json::from_value(raw.content)?),
            MsgType::Error => Content::Error(serde_json::from_value(raw.content)?),
            MsgType::DisplayData => Content::DisplayData(serde_json::from_value(raw.content)?),
            MsgType::ExecuteResult => Content::ExecuteResult(serde_json::from_value(raw.content)?),
            MsgType::Status => Content::Status(decode_status(raw.content)?),
            _ => Content::Other,
        };

        Ok(Self {
            envelope: Envelope {
                header: Header {
                    msg_id: raw.header.msg_id,
                    msg_type,
                    session: raw.header.session,
                    username: raw.header.username,
                    version: raw.header.version,
                },
                parent_header: raw.parent_header.unwrap_or_default(),
                channel,
            },
            content,
        })
    }

    pub fn msg_type(&self) -> MsgType {
        self.envelope.header.msg_type
    }

    /// Whether this message answers the request with the given id.
    pub fn is_child_of(&self, msg_id: &str) -> bool {
        self.envelope.parent_header.msg_id.as_deref() == Some(msg_id)
    }
}

fn decode_status(content: Value) -> Result<StatusContent, ProtocolError> {
    #[derive(Deserialize)]
    struct RawStatus {
        execution_state: String,
    }

    let raw: RawStatus = serde_json::from_value(content)?;
    Ok(StatusContent {
        execution_state: ExecutionState::decode(&raw.execution_state)?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecuteRequestContent {
    pub code: String,
    pub silent: bool,
    pub store_history: bool,
    pub allow_stdin: bool,
    pub stop_on_error: bool,
}

/// An `execute_request` sent on the shell channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecuteRequest {
    pub header: Header,
    pub parent_header: ParentHeader,
    pub metadata: serde_json::Map<String, Value>,
    pub content: ExecuteRequestContent,
    pub channel: Channel,
}

impl ExecuteRequest {
    pub fn new(id: Uuid, session: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            header: Header {
                msg_id: id.to_string(),
                msg_type: MsgType::ExecuteRequest,
                session: session.into(),
                username: env!("CARGO_PKG_NAME").to_string(),
                version: PROTOCOL_VERSION.to_string(),
            },
            parent_header: ParentHeader::default(),
            metadata: serde_json::Map::new(),
            content: ExecuteRequestContent {
                code: code.into(),
                silent: false,
                store_history: false,
                allow_stdin: false,
                stop_on_error: false,
            },
            channel: Channel::Shell,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
