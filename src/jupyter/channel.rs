//! Bidirectional message channel to a running kernel

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use super::message::{ExecuteRequest, Message};
use crate::{Error, Result};

/// Connection lifecycle of a channel. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connected,
    Closed,
}

/// Message stream to one kernel.
///
/// A channel is used by a single execution at a time and is never shared
/// between tasks.
#[async_trait]
pub trait KernelChannel: Send {
    async fn connect(&mut self) -> Result<()>;

    /// Send an `execute_request` whose message id is `id`.
    async fn execute(&mut self, id: Uuid, code: &str) -> Result<()>;

    /// Next decodable message, in arrival order.
    async fn read_message(&mut self) -> Result<Message>;

    /// Release the connection. Safe to call more than once.
    async fn close(&mut self) -> Result<()>;
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket channel served by the gateway at `/api/kernels/{id}/channels`.
pub struct WsChannel {
    url: String,
    session: String,
    socket: Option<Socket>,
    state: ConnectionState,
}

impl WsChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            session: Uuid::new_v4().to_string(),
            socket: None,
            state: ConnectionState::Unconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn socket(&mut self) -> Option<&mut Socket> {
        match self.state {
            ConnectionState::Connected => self.socket.as_mut(),
            _ => None,
        }
    }
}

#[async_trait]
impl KernelChannel for WsChannel {
    async fn connect(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Closed => return Err(Error::Connect("channel already closed".into())),
            ConnectionState::Unconnected => {}
        }

        let (socket, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::Connect(e.to_string()))?;

        self.socket = Some(socket);
        self.state = ConnectionState::Connected;
        Ok(())
    }

    async fn execute(&mut self, id: Uuid, code: &str) -> Result<()> {
        let frame = ExecuteRequest::new(id, self.session.clone(), code)
            .encode()
            .map_err(|e| Error::Send(e.to_string()))?;

        let socket = self
            .socket()
            .ok_or_else(|| Error::Send("channel not connected".into()))?;

        socket
            .send(WsMessage::Text(frame))
            .await
            .map_err(|e| Error::Send(e.to_string()))
    }

    async fn read_message(&mut self) -> Result<Message> {
        loop {
            let socket = self
                .socket()
                .ok_or_else(|| Error::Read("channel not connected".into()))?;

            let frame = match socket.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return Err(Error::Read(e.to_string())),
                None => return Err(Error::Read("connection closed".into())),
            };

            let bytes = match frame {
                WsMessage::Text(text) => text.into_bytes(),
                WsMessage::Binary(data) => data,
                WsMessage::Close(_) => {
                    self.state = ConnectionState::Closed;
                    return Err(Error::Read("connection closed by kernel".into()));
                }
                // Pings are answered by tungstenite itself
                _ => continue,
            };

            return Ok(Message::decode(&bytes)?);
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.state = ConnectionState::Closed;
        match self.socket.take() {
            Some(mut socket) => socket
                .close(None)
                .await
                .map_err(|e| Error::Connect(e.to_string())),
            None => Ok(()),
        }
    }
}
