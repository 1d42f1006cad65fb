//! Jupyter gateway access: kernel lifecycle over REST, execution over
//! WebSocket, and the message codec shared by both.

pub mod channel;
pub mod client;
pub mod message;

pub use channel::{ConnectionState, KernelChannel, WsChannel};
pub use client::{Gateway, GatewayClient, Kernel};
pub use message::{Channel, Content, ExecutionState, Message, MsgType, ProtocolError};

#[cfg(test)]
pub(crate) mod testing;
