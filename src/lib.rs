//! Kernel Sandbox
//!
//! Runs untrusted code snippets on pools of one-shot Jupyter kernels.
//!
//! Each configured pool keeps a few kernels warm on a Jupyter server or
//! kernel gateway. A snippet takes the oldest idle kernel, runs over the
//! kernel's WebSocket channel, and the kernel is deleted afterwards, so no
//! state is shared between executions. When a pool has no idle kernel the
//! request is rejected immediately.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use kernel_sandbox::{Config, Orchestrator, Snippet};
//!
//! # async fn example() -> kernel_sandbox::Result<()> {
//! let config = Config::load("sandbox.yaml")?;
//! let manager = Arc::new(Orchestrator::from_config(&config.sandbox)?);
//!
//! let result = manager
//!     .execute_snippet(&Snippet::new("python", "print(1 + 1)"))
//!     .await?;
//!
//! for event in result.events {
//!     println!("{:?}: {}", event.kind, event.message);
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod executor;
pub mod jupyter;
pub mod models;
pub mod orchestrator;
pub mod pool;
pub mod runtime;

pub use api::Server;
pub use config::{Config, GatewayConfig, KernelConfig, SandboxConfig, ServerConfig};
pub use error::{Error, Result};
pub use models::{Event, EventKind, ExecutionResult, KernelException, Snippet};
pub use orchestrator::Orchestrator;
pub use pool::{KernelPool, PoolStatus};
