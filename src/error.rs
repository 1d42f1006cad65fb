//! Error types for the kernel sandbox

use thiserror::Error;

use crate::jupyter::message::ProtocolError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("kernel closed")]
    KernelClosed,

    #[error("too many requests")]
    TooManyRequests,

    #[error("kernel not found: {0}")]
    KernelNotFound(String),

    #[error("failed to connect to kernel: {0}")]
    Connect(String),

    #[error("failed to execute code: {0}")]
    Send(String),

    #[error("failed to read message: {0}")]
    Read(String),

    #[error("failed to init kernel: {0}")]
    Init(String),

    #[error("{}", join_messages(.0))]
    Multiple(Vec<Error>),

    #[error("shutdown interrupted: grace period elapsed")]
    ShutdownTimeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the caller may reasonably retry the same request later.
    ///
    /// Admission rejection and unknown pools are retryable; a pool that is
    /// shutting down is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TooManyRequests | Error::KernelNotFound(_))
    }

    /// Fold a list of failures into a single result.
    pub fn combine(mut errors: Vec<Error>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Multiple(errors)),
        }
    }
}

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
