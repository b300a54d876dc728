//! Periodic cross-check of locally computed state against the node's own
//! view. Surfaces silent divergence bugs in commit logic; never mutates
//! entities and never halts indexing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::IndexerError;
use crate::models::RightKind;
use crate::node::NodeSource;
use crate::store::Storage;

/// Outcome of one diagnostics pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticsReport {
    pub rights_checked: usize,
    pub balances_checked: usize,
    pub mismatches: usize,
}

impl DiagnosticsReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches == 0
    }
}

/// Read-only cross-checker running on its own schedule.
pub struct Diagnostics<N: NodeSource> {
    node: Arc<N>,
    store: Arc<dyn Storage>,
    interval: Duration,
    /// Cap on delegates checked per pass.
    sample_size: usize,
}

impl<N: NodeSource> Diagnostics<N> {
    pub fn new(node: Arc<N>, store: Arc<dyn Storage>, interval: Duration) -> Self {
        Self { node, store, interval, sample_size: 16 }
    }

    /// Loop until cancelled, running one pass per interval.
    pub async fn run(self, mut cancel: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        return;
                    }
                }
            }
            match self.run_once().await {
                Ok(report) if report.is_clean() => {
                    tracing::debug!(
                        rights = report.rights_checked,
                        balances = report.balances_checked,
                        "diagnostics clean"
                    );
                }
                Ok(report) => {
                    tracing::error!(
                        mismatches = report.mismatches,
                        rights = report.rights_checked,
                        balances = report.balances_checked,
                        "diagnostics found divergence from node"
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, "diagnostics pass failed");
                }
            }
        }
    }

    /// One read-only pass: compare the current cycle's precomputed rights
    /// and a sample of delegate balances against the node.
    pub async fn run_once(&self) -> Result<DiagnosticsReport, IndexerError> {
        let mut report = DiagnosticsReport::default();
        let Some(state) = self.store.load_app_state().await? else {
            return Ok(report);
        };
        if state.level == 0 {
            return Ok(report);
        }

        // Constants come from the persisted protocol of the current head.
        let head = self
            .store
            .get_block(state.level)
            .await?
            .ok_or_else(|| IndexerError::Storage(format!("head block {} missing", state.level)))?;
        let Some(protocol) = self.store.get_protocol(head.proto_code).await? else {
            return Ok(report);
        };
        let cycle = protocol.constants.cycle_of(state.level);

        // Rights cross-check, both duty kinds.
        let local = self.store.get_rights(cycle).await?;
        if !local.is_empty() {
            let baking = self.node.get_baking_rights(cycle).await?;
            self.check_rights(&mut report, state.level, &local, &baking, RightKind::Baking)
                .await?;
            let attesting = self.node.get_attesting_rights(cycle).await?;
            self.check_rights(&mut report, state.level, &local, &attesting, RightKind::Attesting)
                .await?;
        }

        // Delegate balance cross-check.
        for delegate in self.store.list_delegates().await?.into_iter().take(self.sample_size) {
            report.balances_checked += 1;
            let remote = self.node.get_delegate(state.level, &delegate.address).await?;
            if remote.balance != delegate.balance
                || remote.staking_balance != delegate.staking_balance
                || remote.frozen_deposits != delegate.frozen_deposits
            {
                report.mismatches += 1;
                tracing::error!(
                    address = %delegate.address,
                    local_balance = delegate.balance,
                    remote_balance = remote.balance,
                    local_staking = delegate.staking_balance,
                    remote_staking = remote.staking_balance,
                    "delegate balances diverge from node"
                );
            }
        }

        Ok(report)
    }

    async fn check_rights(
        &self,
        report: &mut DiagnosticsReport,
        head_level: i64,
        local: &[crate::models::BakingRight],
        remote: &[crate::node::NodeRight],
        kind: RightKind,
    ) -> Result<(), IndexerError> {
        for right in remote {
            if right.level > head_level {
                continue;
            }
            report.rights_checked += 1;
            let ours = local
                .iter()
                .find(|r| r.kind == kind && r.level == right.level && r.round == right.round);
            let local_delegate = match ours {
                Some(r) => self.store.get_account(r.baker_id).await?.map(|a| a.address),
                None => None,
            };
            if local_delegate.as_deref() != Some(right.delegate.as_str()) {
                report.mismatches += 1;
                tracing::error!(
                    kind = kind.as_str(),
                    level = right.level,
                    round = right.round,
                    remote = %right.delegate,
                    local = local_delegate.as_deref().unwrap_or("<none>"),
                    "precomputed right diverges from node"
                );
            }
        }
        Ok(())
    }
}
