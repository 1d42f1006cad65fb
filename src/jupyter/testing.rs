//! Scripted kernel channel for unit tests

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Notify;
use uuid::Uuid;

use super::channel::KernelChannel;
use super::message::Message;
use crate::{Error, Result};

/// Placeholder replaced by the id of the request being answered.
pub const PARENT: &str = "$PARENT";

#[derive(Debug, Default)]
pub struct Log {
    pub connected: bool,
    pub sent: Vec<String>,
    pub closes: usize,
}

/// Replays canned frames after the first `execute`.
pub struct ScriptedChannel {
    frames: VecDeque<Value>,
    fail_connect: bool,
    fail_send: bool,
    parent: Option<String>,
    gate: Option<Arc<Notify>>,
    delay: Option<Duration>,
    log: Arc<Mutex<Log>>,
}

impl ScriptedChannel {
    pub fn new(frames: Vec<Value>) -> Self {
        Self {
            frames: frames.into(),
            fail_connect: false,
            fail_send: false,
            parent: None,
            gate: None,
            delay: None,
            log: Arc::default(),
        }
    }

    /// Hold the first read until `gate` is notified.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Sleep before every read.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_connect() -> Self {
        Self { fail_connect: true, ..Self::new(Vec::new()) }
    }

    pub fn failing_send() -> Self {
        Self { fail_send: true, ..Self::new(Vec::new()) }
    }

    pub fn log(&self) -> Arc<Mutex<Log>> {
        self.log.clone()
    }
}

#[async_trait]
impl KernelChannel for ScriptedChannel {
    async fn connect(&mut self) -> Result<()> {
        if self.fail_connect {
            return Err(Error::Connect("connection refused".into()));
        }
        self.log.lock().connected = true;
        Ok(())
    }

    async fn execute(&mut self, id: Uuid, code: &str) -> Result<()> {
        if self.fail_send {
            return Err(Error::Send("broken pipe".into()));
        }
        self.parent = Some(id.to_string());
        self.log.lock().sent.push(code.to_string());
        Ok(())
    }

    async fn read_message(&mut self) -> Result<Message> {
        if let Some(gate) = self.gate.take() {
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let frame = self
            .frames
            .pop_front()
            .ok_or_else(|| Error::Read("connection closed".into()))?;
        let text = frame
            .to_string()
            .replace(PARENT, self.parent.as_deref().unwrap_or_default());
        Ok(Message::decode(text.as_bytes())?)
    }

    async fn close(&mut self) -> Result<()> {
        self.log.lock().closes += 1;
        Ok(())
    }
}

fn frame(msg_type: &str, parent: &str, content: Value) -> Value {
    json!({
        "header": {"msg_id": Uuid::new_v4().to_string(), "msg_type": msg_type, "session": "s"},
        "parent_header": {"msg_id": parent, "msg_type": "execute_request"},
        "channel": "iopub",
        "content": content,
    })
}

pub fn status(state: &str) -> Value {
    frame("status", PARENT, json!({"execution_state": state}))
}

pub fn stream(name: &str, text: &str) -> Value {
    frame("stream", PARENT, json!({"name": name, "text": text}))
}

pub fn reply(status: &str) -> Value {
    frame("execute_reply", PARENT, json!({"status": status, "execution_count": 1}))
}

pub fn error(ename: &str, evalue: &str) -> Value {
    frame(
        "error",
        PARENT,
        json!({"ename": ename, "evalue": evalue, "traceback": [format!("{}: {}", ename, evalue)]}),
    )
}

pub fn display(data: Value) -> Value {
    frame("display_data", PARENT, json!({"data": data, "metadata": {}}))
}

pub fn result(data: Value) -> Value {
    frame("execute_result", PARENT, json!({"data": data, "metadata": {}, "execution_count": 1}))
}

/// Stream output answering some other request.
pub fn foreign_stream(text: &str) -> Value {
    frame("stream", "someone-else", json!({"name": "stdout", "text": text}))
}

/// Frames of a successful run printing `text` to stdout.
pub fn printing(text: &str) -> Vec<Value> {
    vec![status("busy"), stream("stdout", text), reply("ok"), status("idle")]
}
