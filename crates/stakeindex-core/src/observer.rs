//! Head-tracking loop.
//!
//! State machine: `Idle → CheckingHead → ValidatingBranch → Applying →
//! Idle`, forever until cancelled. Branch validation reverts the local head
//! one block at a time while the remote chain disagrees at our level; it
//! terminates at worst at genesis. Applying is strictly level-by-level —
//! block N+1 is prefetched while N is applied, but never applied before N
//! is durably committed.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::engine::IndexingEngine;
use crate::error::IndexerError;
use crate::node::NodeSource;
use crate::types::{BlockHash, Level, ProtocolHash};

/// Current state accessor for external health/readiness checks.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SyncStatus {
    pub level: Level,
    pub hash: BlockHash,
    pub protocol: ProtocolHash,
    pub is_syncing: bool,
}

#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// Sleep between head checks when nothing changed.
    pub poll_interval: Duration,
    /// Initial backoff after a transient failure.
    pub retry_backoff: Duration,
    /// Backoff growth cap.
    pub max_backoff: Duration,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            retry_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Drives the engine forward (or backward) against the remote node.
pub struct Observer<N: NodeSource> {
    node: Arc<N>,
    engine: IndexingEngine,
    config: ObserverConfig,
    status: Arc<RwLock<SyncStatus>>,
    cancel: watch::Receiver<bool>,
}

impl<N: NodeSource> Observer<N> {
    pub fn new(
        node: Arc<N>,
        engine: IndexingEngine,
        config: ObserverConfig,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let state = engine.state();
        let status = Arc::new(RwLock::new(SyncStatus {
            level: state.level,
            hash: state.hash.clone(),
            protocol: state.protocol.clone(),
            is_syncing: true,
        }));
        Self { node, engine, config, status, cancel }
    }

    /// Shared handle to the published sync status.
    pub fn status(&self) -> Arc<RwLock<SyncStatus>> {
        self.status.clone()
    }

    /// Run until cancelled. Transient errors are logged and retried with
    /// exponential backoff and bounded jitter; only fatal errors escape.
    pub async fn run(mut self) -> Result<(), IndexerError> {
        let mut backoff = self.config.retry_backoff;
        loop {
            if *self.cancel.borrow() {
                tracing::info!("observer cancelled");
                return Ok(());
            }
            match self.step().await {
                Ok(progressed) => {
                    backoff = self.config.retry_backoff;
                    if !progressed && self.sleep(self.config.poll_interval).await {
                        return Ok(());
                    }
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "fatal error, stopping observer");
                    return Err(e);
                }
                Err(IndexerError::Cancelled) => return Ok(()),
                Err(e) => {
                    tracing::warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "retrying after error");
                    if self.sleep(with_jitter(backoff)).await {
                        return Ok(());
                    }
                    backoff = (backoff * 2).min(self.config.max_backoff);
                }
            }
        }
    }

    /// One pass through the state machine. Returns `true` if any block was
    /// applied or reverted.
    async fn step(&mut self) -> Result<bool, IndexerError> {
        // CheckingHead
        let head = self.node.get_head().await?;
        self.engine.set_known_head(head.level);
        let state = self.engine.state();
        if head.level == state.level && head.hash == state.hash {
            self.publish(true);
            return Ok(false);
        }
        self.publish(false);

        // ValidatingBranch: while the remote disagrees at our level, the
        // chain reorganized under us — unwind one block at a time.
        while self.engine.state().level > 0 {
            if *self.cancel.borrow() {
                return Err(IndexerError::Cancelled);
            }
            let local = self.engine.state();
            if local.level > head.level {
                // Remote head is behind us; unwind to its level first.
                tracing::warn!(level = local.level, head = head.level, "local head above remote, reverting");
                self.engine.revert_last().await?;
                self.publish(false);
                continue;
            }
            let remote = self.node.get_header(local.level).await?;
            if remote.hash == local.hash {
                break;
            }
            tracing::warn!(
                level = local.level,
                local = %local.hash,
                remote = %remote.hash,
                "branch mismatch, reverting"
            );
            self.engine.revert_last().await?;
            self.publish(false);
        }

        // Applying: strictly in level order, prefetching one block ahead.
        let mut progressed = false;
        let mut prefetch: Option<JoinHandle<Result<serde_json::Value, IndexerError>>> = None;
        while self.engine.state().level < head.level {
            if *self.cancel.borrow() {
                return Err(IndexerError::Cancelled);
            }
            let next = self.engine.state().level + 1;
            let json = match prefetch.take() {
                Some(handle) => handle
                    .await
                    .map_err(|e| IndexerError::Node(format!("prefetch task failed: {e}")))??,
                None => self.node.get_block(next).await?,
            };
            if next + 1 <= head.level {
                let node = self.node.clone();
                prefetch = Some(tokio::spawn(async move { node.get_block(next + 1).await }));
            }
            let raw = self.engine.decode(&json)?;
            self.engine.apply(&raw).await?;
            progressed = true;
            self.publish(self.engine.state().is_synced());
        }
        Ok(progressed)
    }

    fn publish(&self, synced: bool) {
        let state = self.engine.state();
        let mut status = self.status.write().expect("status lock poisoned");
        status.level = state.level;
        status.hash = state.hash.clone();
        status.protocol = state.protocol.clone();
        status.is_syncing = !synced;
    }

    /// Cancellable sleep; returns `true` if cancellation fired. A dropped
    /// cancellation sender counts as cancellation.
    async fn sleep(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            changed = self.cancel.changed() => changed.is_err() || *self.cancel.borrow(),
        }
    }
}

/// Add up to 25% random jitter so synchronized retries spread out.
fn with_jitter(base: Duration) -> Duration {
    let jitter_ms = base.as_millis() as u64 / 4;
    if jitter_ms == 0 {
        return base;
    }
    base + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_bounded() {
        let base = Duration::from_millis(1000);
        for _ in 0..100 {
            let d = with_jitter(base);
            assert!(d >= base && d < base + Duration::from_millis(250));
        }
    }

    #[test]
    fn zero_backoff_has_no_jitter() {
        assert_eq!(with_jitter(Duration::ZERO), Duration::ZERO);
    }
}
