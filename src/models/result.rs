//! Execution result model

use serde::{Deserialize, Serialize};

/// Aggregated outcome of one execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Status from the execute reply (`ok`, `error`, `aborted`), empty when
    /// no reply arrived
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub errors: Vec<KernelException>,
    #[serde(default)]
    pub events: Vec<Event>,
}

impl ExecutionResult {
    pub fn is_error(&self) -> bool {
        self.status == "error"
    }

    /// One-line summary of the reported exceptions.
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| match (e.name.is_empty(), e.message.is_empty()) {
                (true, _) => e.message.clone(),
                (false, true) => e.name.clone(),
                (false, false) => format!("{}: {}", e.name, e.message),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Exception raised by the kernel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelException {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traceback: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    #[default]
    None,
    Output,
    Error,
    Payload,
}

/// One piece of output, in the order the kernel produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    /// MIME type for display output; absent for stream output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    /// Text, or base64 for binary payloads
    pub message: String,
}

impl Event {
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            mime: None,
            message: message.into(),
        }
    }

    pub fn output(message: impl Into<String>) -> Self {
        Self::new(EventKind::Output, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventKind::Error, message)
    }

    pub fn payload(mime: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(EventKind::Payload, message).with_mime(mime)
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }
}
