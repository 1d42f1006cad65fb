//! Single-execution driver
//!
//! Sends one `execute_request` over a kernel channel and folds every message
//! that answers it into an [`ExecutionResult`] until the kernel reports idle.
//! Messages answering other requests are skipped.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use uuid::Uuid;

use crate::jupyter::message::{Content, DisplayData, ExecutionState, Message, MimePart, StreamContent};
use crate::jupyter::KernelChannel;
use crate::models::{Event, EventKind, ExecutionResult, KernelException};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Sent,
    Draining,
    Done,
}

/// Accumulated state of one execution.
#[derive(Debug)]
pub struct Execution {
    id: Uuid,
    msg_id: String,
    phase: Phase,
    result: ExecutionResult,
}

impl Execution {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            msg_id: id.to_string(),
            phase: Phase::Connecting,
            result: ExecutionResult::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Fold one message in. Returns `true` once the kernel reports idle for
    /// this request.
    pub fn accept(&mut self, message: Message) -> bool {
        if !message.is_child_of(&self.msg_id) {
            return false;
        }
        if self.phase == Phase::Sent {
            self.phase = Phase::Draining;
        }

        match message.content {
            Content::DisplayData(data) | Content::ExecuteResult(data) => self.display(&data),
            Content::Stream(stream) => self.result.events.push(stream_event(stream)),
            Content::Error(error) => self.result.errors.push(KernelException {
                name: error.ename,
                message: error.evalue,
                traceback: error.traceback,
            }),
            Content::ExecuteReply(reply) => self.result.status = reply.status,
            Content::Status(status) if status.execution_state == ExecutionState::Idle => {
                self.phase = Phase::Done;
                return true;
            }
            _ => {}
        }
        false
    }

    fn display(&mut self, data: &DisplayData) {
        for (mime, part) in data.parts() {
            let event = match part {
                MimePart::Text(text) => Event::output(text).with_mime(mime),
                MimePart::Binary(bytes) => Event::payload(mime, STANDARD.encode(bytes)),
            };
            self.result.events.push(event);
        }
    }

    pub fn into_result(self) -> ExecutionResult {
        self.result
    }
}

fn stream_event(stream: StreamContent) -> Event {
    let kind = match stream.name.as_str() {
        "stdout" => EventKind::Output,
        "stderr" => EventKind::Error,
        _ => EventKind::None,
    };
    Event::new(kind, stream.text)
}

/// Run `code` on the kernel behind `channel`.
///
/// The channel is closed before returning, whatever the outcome.
pub async fn execute_code(
    channel: &mut dyn KernelChannel,
    id: Uuid,
    code: &str,
) -> Result<ExecutionResult> {
    let mut execution = Execution::new(id);
    let outcome = drive(channel, &mut execution, code).await;

    if let Err(e) = channel.close().await {
        tracing::debug!(execution = %id, error = %e, "Failed to close kernel channel");
    }

    match outcome {
        Ok(()) => Ok(execution.into_result()),
        Err(e) => {
            tracing::debug!(execution = %id, phase = ?execution.phase(), error = %e, "Execution failed");
            Err(e)
        }
    }
}

async fn drive(channel: &mut dyn KernelChannel, execution: &mut Execution, code: &str) -> Result<()> {
    channel.connect().await.map_err(|e| match e {
        Error::Connect(_) => e,
        other => Error::Connect(other.to_string()),
    })?;

    channel.execute(execution.id, code).await.map_err(|e| match e {
        Error::Send(_) => e,
        other => Error::Send(other.to_string()),
    })?;
    execution.phase = Phase::Sent;

    loop {
        let message = channel.read_message().await.map_err(|e| match e {
            Error::Read(_) => e,
            other => Error::Read(other.to_string()),
        })?;

        if execution.accept(message) {
            return Ok(());
        }
    }
}
