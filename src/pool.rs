//! Pool of one-shot kernels
//!
//! Each pool keeps between `min` and `max` kernels alive for one named
//! configuration. Idle kernels are handed out first-in first-out and every
//! kernel is deleted after a single execution, so no state carries over
//! between snippets. Admission is fail-fast: when no idle kernel is ready the
//! request is rejected instead of queued.
//!
//! `total` counts every kernel the pool is responsible for: idle, executing,
//! being created or being deleted. A slot is reserved before a kernel is
//! created and released only once it is gone, which keeps
//! `idle <= total <= max` at all times.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::config::KernelConfig;
use crate::executor;
use crate::jupyter::{Gateway, Kernel};
use crate::models::{ExecutionResult, Snippet};
use crate::{Error, Result};

/// Pool status information
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub name: String,
    pub total: usize,
    pub idle: usize,
    pub min: usize,
    pub max: usize,
    pub closing: bool,
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<Kernel>,
    closing: bool,
}

struct Inner {
    name: String,
    kernelspec: String,
    init: Option<String>,
    min: usize,
    max: usize,
    gateway: Arc<dyn Gateway>,
    state: Mutex<PoolState>,
    total: AtomicUsize,
}

impl Inner {
    /// Claim a slot if fewer than `limit` kernels exist.
    fn reserve(&self, limit: usize) -> bool {
        let limit = limit.min(self.max);
        self.total
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |total| {
                (total < limit).then_some(total + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        self.total.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Manages the kernels of one named configuration.
///
/// Cloning is cheap and yields a handle to the same pool.
#[derive(Clone)]
pub struct KernelPool {
    inner: Arc<Inner>,
}

impl fmt::Debug for KernelPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelPool")
            .field("name", &self.inner.name)
            .field("total", &self.live_count())
            .field("max", &self.inner.max)
            .finish_non_exhaustive()
    }
}

impl KernelPool {
    pub fn new(config: &KernelConfig, gateway: Arc<dyn Gateway>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: config.name.to_lowercase(),
                kernelspec: config.kernelspec().to_string(),
                init: config.init.clone(),
                min: config.min,
                max: config.max,
                gateway,
                state: Mutex::new(PoolState::default()),
                total: AtomicUsize::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of kernels the pool is responsible for.
    pub fn live_count(&self) -> usize {
        self.inner.total.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            name: self.inner.name.clone(),
            total: self.live_count(),
            idle: state.idle.len(),
            min: self.inner.min,
            max: self.inner.max,
            closing: state.closing,
        }
    }

    /// Create one kernel if the pool holds fewer than `min`.
    pub async fn replenish(&self) -> Result<()> {
        if self.inner.state.lock().closing {
            return Err(Error::KernelClosed);
        }
        if !self.inner.reserve(self.inner.min) {
            return Ok(());
        }
        self.create_instance().await
    }

    /// Run a snippet on the oldest idle kernel.
    ///
    /// The kernel is deleted afterwards in the background whatever the
    /// outcome, and a replacement is started if the pool is below `max`.
    /// Dropping the returned future does not cut the execution short.
    pub async fn execute_snippet(&self, snippet: &Snippet) -> Result<ExecutionResult> {
        let kernel = {
            let mut state = self.inner.state.lock();
            if state.closing {
                return Err(Error::KernelClosed);
            }
            let Some(kernel) = state.idle.pop_front() else {
                tracing::debug!(pool = %self.inner.name, execution = %snippet.id, "No idle kernel");
                return Err(Error::TooManyRequests);
            };
            if self.live_count() < self.inner.max {
                let pool = self.clone();
                tokio::spawn(async move { pool.backfill().await });
            }
            kernel
        };

        tracing::debug!(pool = %self.inner.name, kernel = %kernel.id, execution = %snippet.id, "Kernel acquired");

        // The kernel is owned by the task, so it is discarded even if the
        // caller goes away mid-execution.
        let pool = self.clone();
        let (id, source) = (snippet.id, snippet.source.clone());
        let execution = tokio::spawn(async move {
            let mut channel = pool.inner.gateway.channel(&kernel);
            let result = executor::execute_code(channel.as_mut(), id, &source).await;
            drop(channel);

            let discard = pool.clone();
            tokio::spawn(async move { discard.discard(kernel).await });
            result
        });

        execution.await.map_err(|e| {
            tracing::error!(pool = %self.inner.name, execution = %snippet.id, error = %e, "Execution task failed");
            Error::Io(std::io::Error::other(e))
        })?
    }

    /// Close the pool and delete every idle kernel.
    ///
    /// Kernels that are executing are deleted by their execution. Kernels
    /// still being created are deleted as soon as creation completes.
    pub async fn destroy(&self) -> Result<()> {
        let idle: Vec<Kernel> = {
            let mut state = self.inner.state.lock();
            state.closing = true;
            state.idle.drain(..).collect()
        };

        tracing::info!(pool = %self.inner.name, count = idle.len(), "Destroying idle kernels");

        let results = join_all(idle.iter().map(|k| self.inner.gateway.remove_kernel(k))).await;
        for _ in &idle {
            self.inner.release();
        }

        Error::combine(results.into_iter().filter_map(|r| r.err()).collect())
    }

    /// Grow towards `max` after a kernel was taken.
    async fn backfill(&self) {
        if self.inner.state.lock().closing || !self.inner.reserve(self.inner.max) {
            return;
        }
        match self.create_instance().await {
            Ok(()) | Err(Error::KernelClosed) => {}
            Err(e) => {
                tracing::warn!(pool = %self.inner.name, error = %e, "Failed to backfill pool");
            }
        }
    }

    /// Create, initialize and enqueue one kernel. A slot must already be
    /// reserved; it is released on every failure path.
    async fn create_instance(&self) -> Result<()> {
        let kernel = match self.inner.gateway.create_kernel(&self.inner.kernelspec).await {
            Ok(kernel) => kernel,
            Err(e) => {
                self.inner.release();
                return Err(e);
            }
        };

        if let Some(init) = &self.inner.init {
            if let Err(e) = self.initialize(&kernel, init).await {
                self.discard(kernel).await;
                return Err(e);
            }
        }

        {
            let mut state = self.inner.state.lock();
            if !state.closing {
                tracing::info!(pool = %self.inner.name, kernel = %kernel.id, "Kernel ready");
                state.idle.push_back(kernel);
                return Ok(());
            }
        }

        self.discard(kernel).await;
        Err(Error::KernelClosed)
    }

    async fn initialize(&self, kernel: &Kernel, init: &str) -> Result<()> {
        let mut channel = self.inner.gateway.channel(kernel);
        let result = executor::execute_code(channel.as_mut(), Uuid::new_v4(), init)
            .await
            .map_err(|e| Error::Init(e.to_string()))?;

        if result.is_error() {
            return Err(Error::Init(result.error_summary()));
        }
        Ok(())
    }

    /// Delete a kernel and free its slot.
    async fn discard(&self, kernel: Kernel) {
        if let Err(e) = self.inner.gateway.remove_kernel(&kernel).await {
            tracing::warn!(pool = %self.inner.name, kernel = %kernel.id, error = %e, "Failed to remove kernel");
        }
        self.inner.release();
        tracing::debug!(pool = %self.inner.name, kernel = %kernel.id, "Kernel removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::jupyter::client::MockGateway;
    use crate::jupyter::testing::{self, ScriptedChannel};
    use crate::jupyter::KernelChannel;
    use crate::models::Event;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn kernel(name: &str) -> Kernel {
        Kernel {
            id: Uuid::new_v4(),
            name: name.to_string(),
            address: None,
            chan_url: "ws://jupyter:8888/api/kernels/x/channels".to_string(),
        }
    }

    fn config(min: usize, max: usize) -> KernelConfig {
        KernelConfig::new("python", GatewayConfig::new("http://jupyter:8888", "secret"))
            .kernel("python3")
            .min(min)
            .max(max)
    }

    fn scripted(
        frames: fn() -> Vec<Value>,
    ) -> impl FnMut(&Kernel) -> Box<dyn KernelChannel> + Send + 'static {
        move |_: &Kernel| -> Box<dyn KernelChannel> { Box::new(ScriptedChannel::new(frames())) }
    }

    fn printing() -> Vec<Value> {
        testing::printing("hi\n")
    }

    fn gateway() -> MockGateway {
        let mut gateway = MockGateway::new();
        gateway
            .expect_create_kernel()
            .returning(|name| Ok(kernel(name)));
        gateway.expect_remove_kernel().returning(|_| Ok(()));
        gateway.expect_channel().returning(scripted(printing));
        gateway
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_replenish_up_to_min() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_create_kernel()
            .withf(|name| name == "python3")
            .times(2)
            .returning(|name| Ok(kernel(name)));
        let pool = KernelPool::new(&config(2, 4), Arc::new(gateway));

        for _ in 0..5 {
            pool.replenish().await.unwrap();
        }

        let status = pool.status();
        assert_eq!(status.total, 2);
        assert_eq!(status.idle, 2);
        assert!(!status.closing);
    }

    #[tokio::test]
    async fn test_empty_pool_rejects() {
        let pool = KernelPool::new(&config(1, 3), Arc::new(gateway()));

        let err = pool.execute_snippet(&Snippet::new("python", "1")).await.unwrap_err();

        assert!(matches!(err, Error::TooManyRequests));
        assert_eq!(pool.live_count(), 0);
    }

    #[tokio::test]
    async fn test_fail_fast_admission() {
        let gate = Arc::new(Notify::new());
        let created = AtomicUsize::new(0);
        let mut gateway = MockGateway::new();
        gateway.expect_create_kernel().returning(move |name| {
            match created.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(kernel(name)),
                _ => Err(Error::Gateway("exhausted".into())),
            }
        });
        gateway.expect_remove_kernel().returning(|_| Ok(()));
        gateway.expect_channel().returning({
            let gate = gate.clone();
            move |_: &Kernel| -> Box<dyn KernelChannel> {
                Box::new(ScriptedChannel::new(printing()).gated(gate.clone()))
            }
        });
        let pool = KernelPool::new(&config(1, 3), Arc::new(gateway));
        pool.replenish().await.unwrap();
        assert_eq!(pool.status().idle, 1);

        let calls: Vec<_> = (0..3)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move {
                    pool.execute_snippet(&Snippet::new("python", "print('hi')")).await
                })
            })
            .collect();

        // The winner holds its kernel until the gate opens; the others
        // must already have been turned away.
        settle().await;
        assert_eq!(calls.iter().filter(|c| c.is_finished()).count(), 2);
        assert_eq!(pool.live_count(), 1);
        assert_eq!(pool.status().idle, 0);
        gate.notify_one();

        let mut results = Vec::new();
        for call in calls {
            results.push(call.await.unwrap());
        }

        let ok: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(ok.len(), 1);
        assert_eq!(ok[0].events, vec![Event::output("hi\n")]);
        let rejected = results
            .iter()
            .filter(|r| matches!(r, Err(Error::TooManyRequests)))
            .count();
        assert_eq!(rejected, 2);

        settle().await;
        assert_eq!(pool.live_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_caller_still_discards_kernel() {
        let mut gateway = MockGateway::new();
        gateway.expect_create_kernel().times(2).returning(|name| Ok(kernel(name)));
        gateway.expect_remove_kernel().times(1).returning(|_| Ok(()));
        let logs = Arc::new(Mutex::new(Vec::new()));
        gateway.expect_channel().returning({
            let logs = logs.clone();
            move |_: &Kernel| -> Box<dyn KernelChannel> {
                let channel = ScriptedChannel::new(printing()).delayed(Duration::from_millis(200));
                logs.lock().push(channel.log());
                Box::new(channel)
            }
        });
        let pool = KernelPool::new(&config(1, 1), Arc::new(gateway));
        pool.replenish().await.unwrap();

        let snippet = Snippet::new("python", "print('hi')");
        let outcome = tokio::time::timeout(Duration::from_millis(20), pool.execute_snippet(&snippet)).await;
        assert!(outcome.is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(pool.live_count(), 0);
        assert_eq!(logs.lock()[0].lock().closes, 1);

        pool.replenish().await.unwrap();
        assert_eq!(pool.status().idle, 1);
    }

    #[tokio::test]
    async fn test_kernel_discarded_after_use() {
        let mut gateway = MockGateway::new();
        let created = AtomicUsize::new(0);
        gateway.expect_create_kernel().returning(move |name| {
            match created.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(kernel(name)),
                _ => Err(Error::Gateway("exhausted".into())),
            }
        });
        gateway.expect_remove_kernel().times(1).returning(|_| Ok(()));
        gateway.expect_channel().returning(scripted(printing));
        let pool = KernelPool::new(&config(1, 3), Arc::new(gateway));
        pool.replenish().await.unwrap();

        let result = pool.execute_snippet(&Snippet::new("python", "print('hi')")).await.unwrap();
        assert_eq!(result.status, "ok");

        settle().await;
        assert_eq!(pool.live_count(), 0);
        assert_eq!(pool.status().idle, 0);
    }

    #[tokio::test]
    async fn test_execution_backfills() {
        let pool = KernelPool::new(&config(1, 3), Arc::new(gateway()));
        pool.replenish().await.unwrap();

        pool.execute_snippet(&Snippet::new("python", "1")).await.unwrap();
        settle().await;

        let status = pool.status();
        assert_eq!(status.idle, 1);
        assert_eq!(status.total, 1);
    }

    #[tokio::test]
    async fn test_kernel_error_is_a_result() {
        let mut gateway = MockGateway::new();
        gateway.expect_create_kernel().returning(|name| Ok(kernel(name)));
        gateway.expect_remove_kernel().returning(|_| Ok(()));
        gateway.expect_channel().returning(scripted(|| {
            vec![
                testing::error("Exception", "boom"),
                testing::reply("error"),
                testing::status("idle"),
            ]
        }));
        let pool = KernelPool::new(&config(1, 1), Arc::new(gateway));
        pool.replenish().await.unwrap();

        let result = pool
            .execute_snippet(&Snippet::new("python", "raise Exception('boom')"))
            .await
            .unwrap();

        assert_eq!(result.status, "error");
        assert_eq!(result.errors[0].message, "boom");
        assert!(result.events.is_empty());
    }

    #[tokio::test]
    async fn test_failed_execution_still_discards() {
        let mut gateway = MockGateway::new();
        gateway.expect_create_kernel().times(1).returning(|name| Ok(kernel(name)));
        gateway.expect_remove_kernel().times(1).returning(|_| Ok(()));
        gateway
            .expect_channel()
            .returning(|_: &Kernel| -> Box<dyn KernelChannel> {
                Box::new(ScriptedChannel::failing_connect())
            });
        let pool = KernelPool::new(&config(1, 1), Arc::new(gateway));
        pool.replenish().await.unwrap();

        let err = pool.execute_snippet(&Snippet::new("python", "1")).await.unwrap_err();
        assert!(matches!(err, Error::Connect(_)));

        settle().await;
        assert_eq!(pool.live_count(), 0);
    }

    #[tokio::test]
    async fn test_create_failure_releases_slot() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_create_kernel()
            .returning(|_| Err(Error::Gateway("invalid server response (500)".into())));
        let pool = KernelPool::new(&config(1, 2), Arc::new(gateway));

        let err = pool.replenish().await.unwrap_err();

        assert!(matches!(err, Error::Gateway(_)));
        assert_eq!(pool.live_count(), 0);
    }

    #[tokio::test]
    async fn test_init_runs_before_enqueue() {
        let mut gateway = MockGateway::new();
        gateway.expect_create_kernel().returning(|name| Ok(kernel(name)));
        let log = Arc::new(Mutex::new(Vec::new()));
        let sent = log.clone();
        gateway
            .expect_channel()
            .returning(move |_: &Kernel| -> Box<dyn KernelChannel> {
                let channel = ScriptedChannel::new(printing());
                sent.lock().push(channel.log());
                Box::new(channel)
            });
        let pool = KernelPool::new(&config(1, 2).init("import math"), Arc::new(gateway));

        pool.replenish().await.unwrap();

        assert_eq!(pool.status().idle, 1);
        let logs = log.lock();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].lock().sent, vec!["import math".to_string()]);
    }

    #[tokio::test]
    async fn test_init_failure_discards_kernel() {
        let mut gateway = MockGateway::new();
        gateway.expect_create_kernel().returning(|name| Ok(kernel(name)));
        gateway.expect_remove_kernel().times(1).returning(|_| Ok(()));
        gateway.expect_channel().returning(scripted(|| {
            vec![
                testing::error("ModuleNotFoundError", "No module named 'nope'"),
                testing::reply("error"),
                testing::status("idle"),
            ]
        }));
        let pool = KernelPool::new(&config(1, 2).init("import nope"), Arc::new(gateway));

        let err = pool.replenish().await.unwrap_err();

        assert!(matches!(err, Error::Init(ref msg) if msg.contains("No module named")));
        assert_eq!(pool.live_count(), 0);
        assert_eq!(pool.status().idle, 0);
    }

    #[tokio::test]
    async fn test_destroy_closes_pool() {
        let mut gateway = MockGateway::new();
        gateway.expect_create_kernel().returning(|name| Ok(kernel(name)));
        gateway.expect_remove_kernel().times(2).returning(|_| Ok(()));
        let pool = KernelPool::new(&config(2, 2), Arc::new(gateway));
        pool.replenish().await.unwrap();
        pool.replenish().await.unwrap();

        pool.destroy().await.unwrap();

        let status = pool.status();
        assert!(status.closing);
        assert_eq!((status.total, status.idle), (0, 0));

        let err = pool.execute_snippet(&Snippet::new("python", "1")).await.unwrap_err();
        assert!(matches!(err, Error::KernelClosed));
        assert!(matches!(pool.replenish().await, Err(Error::KernelClosed)));
    }

    #[tokio::test]
    async fn test_destroy_combines_errors() {
        let mut gateway = MockGateway::new();
        gateway.expect_create_kernel().returning(|name| Ok(kernel(name)));
        gateway
            .expect_remove_kernel()
            .returning(|_| Err(Error::Gateway("unreachable".into())));
        let pool = KernelPool::new(&config(2, 2), Arc::new(gateway));
        pool.replenish().await.unwrap();
        pool.replenish().await.unwrap();

        let err = pool.destroy().await.unwrap_err();

        assert!(matches!(err, Error::Multiple(ref errs) if errs.len() == 2));
        assert_eq!(pool.live_count(), 0);
    }

    #[tokio::test]
    async fn test_total_never_exceeds_max() {
        let pool = KernelPool::new(&config(3, 3), Arc::new(gateway()));

        let results = join_all((0..10).map(|_| pool.replenish())).await;

        assert!(results.iter().all(|r| r.is_ok()));
        let status = pool.status();
        assert_eq!(status.total, 3);
        assert!(status.idle <= status.total);
    }

    /// Gateway whose kernel creation waits for a signal.
    struct GatedGateway {
        gate: Notify,
        removed: AtomicUsize,
    }

    #[async_trait]
    impl Gateway for GatedGateway {
        async fn create_kernel(&self, name: &str) -> Result<Kernel> {
            self.gate.notified().await;
            Ok(kernel(name))
        }

        async fn remove_kernel(&self, _kernel: &Kernel) -> Result<()> {
            self.removed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn channel(&self, _kernel: &Kernel) -> Box<dyn KernelChannel> {
            Box::new(ScriptedChannel::new(printing()))
        }
    }

    #[tokio::test]
    async fn test_kernel_created_during_destroy_is_removed() {
        let gateway = Arc::new(GatedGateway {
            gate: Notify::new(),
            removed: AtomicUsize::new(0),
        });
        let pool = KernelPool::new(&config(1, 1), gateway.clone());

        let pending = tokio::spawn({
            let pool = pool.clone();
            async move { pool.replenish().await }
        });
        settle().await;
        assert_eq!(pool.live_count(), 1);

        pool.destroy().await.unwrap();
        gateway.gate.notify_one();

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::KernelClosed));
        assert_eq!(gateway.removed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.live_count(), 0);
        assert_eq!(pool.status().idle, 0);
    }
}
