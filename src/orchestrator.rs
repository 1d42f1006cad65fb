//! Orchestrator for managing the named kernel pools
//!
//! Owns one [`KernelPool`] per configured kernel, keeps every pool topped up
//! from a periodic ticker and routes snippets to the pool they name.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::SandboxConfig;
use crate::jupyter::GatewayClient;
use crate::models::{ExecutionResult, Snippet};
use crate::pool::{KernelPool, PoolStatus};
use crate::{Error, Result};

/// Period of the replenish ticker.
pub const REPLENISH_INTERVAL: Duration = Duration::from_millis(500);

/// Routes snippets to kernel pools by name
#[derive(Debug)]
pub struct Orchestrator {
    pools: HashMap<String, KernelPool>,
    interval: Duration,
}

impl Orchestrator {
    /// Build one pool per configured kernel, each with its own gateway client.
    pub fn from_config(config: &SandboxConfig) -> Result<Self> {
        config.validate()?;

        let pools = config
            .kernels
            .iter()
            .map(|kernel| {
                let gateway = GatewayClient::new(&kernel.gateway)?;
                Ok(KernelPool::new(kernel, Arc::new(gateway)))
            })
            .collect::<Result<Vec<_>>>()?;

        Self::with_pools(pools)
    }

    pub fn with_pools(pools: impl IntoIterator<Item = KernelPool>) -> Result<Self> {
        let mut by_name = HashMap::new();
        for pool in pools {
            let name = pool.name().to_string();
            if by_name.insert(name.clone(), pool).is_some() {
                return Err(Error::Config(format!("duplicate kernel name: {}", name)));
            }
        }

        Ok(Self {
            pools: by_name,
            interval: REPLENISH_INTERVAL,
        })
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn pool(&self, name: &str) -> Option<&KernelPool> {
        self.pools.get(&name.to_lowercase())
    }

    /// Status of every pool, sorted by name.
    pub fn status(&self) -> Vec<PoolStatus> {
        let mut statuses: Vec<_> = self.pools.values().map(KernelPool::status).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Sum of live kernels across pools.
    pub fn readiness_count(&self) -> usize {
        self.pools.values().map(KernelPool::live_count).sum()
    }

    pub async fn execute_snippet(&self, snippet: &Snippet) -> Result<ExecutionResult> {
        let pool = self
            .pool(&snippet.kernel)
            .ok_or_else(|| Error::KernelNotFound(snippet.kernel.clone()))?;
        pool.execute_snippet(snippet).await
    }

    /// Keep pools replenished until `token` is cancelled, then destroy them.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        tracing::info!(pools = self.pools.len(), interval = ?self.interval, "Pool manager started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.replenish_all().await,
            }
        }

        tracing::info!("Pool manager stopping");
        self.destroy_all().await
    }

    async fn replenish_all(&self) {
        let results = join_all(self.pools.values().map(|pool| async move {
            (pool.name(), pool.replenish().await)
        }))
        .await;

        for (name, result) in results {
            match result {
                Ok(()) | Err(Error::KernelClosed) => {}
                Err(e) => tracing::error!(pool = %name, error = %e, "Failed to replenish pool"),
            }
        }
    }

    /// Destroy every pool, collecting all failures.
    pub async fn destroy_all(&self) -> Result<()> {
        let results = join_all(self.pools.values().map(|pool| async move {
            (pool.name(), pool.destroy().await)
        }))
        .await;

        let mut errors = Vec::new();
        for (name, result) in results {
            if let Err(e) = result {
                tracing::error!(pool = %name, error = %e, "Failed to destroy pool");
                errors.push(e);
            }
        }
        Error::combine(errors)
    }
}
