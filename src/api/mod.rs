//! HTTP API for snippet execution

mod handlers;
mod server;
mod types;

pub use server::Server;
pub use types::*;
