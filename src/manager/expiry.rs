//! Expiry sweeps and drift repair.
//!
//! The worker runs off the main domain and only deletes expired records
//! from the store. Deleted ids travel back over a channel; the world side
//! of the teardown happens when the host calls
//! [`TombstoneManager::process_expired`] from its own tick.

use super::{TeardownMode, TombstoneManager};
use crate::clock::Clock;
use crate::core::{GraveError, Millis, Position, RecordId, Result};
use crate::instance::TombstoneInstance;
use crate::storage::TombstoneStore;
use crate::world::World;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{Instrument, Level, event, info_span};

/// Ids one store sweep deleted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredBatch {
    pub ids: Vec<RecordId>,
    pub swept_at: Millis,
}

#[derive(Debug, Clone, Default)]
pub struct ExpiryReport {
    /// Records the store sweeps deleted
    pub deleted: usize,
    /// Instances torn down in this pass, in teardown order
    pub torn_down: Vec<TombstoneInstance>,
    /// Labels or effects re-created on otherwise healthy tombstones
    pub repaired: usize,
}

/// Background task deleting expired records every interval.
pub struct ExpiryWorker {
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl ExpiryWorker {
    pub fn spawn<S: TombstoneStore + 'static>(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        results: mpsc::UnboundedSender<ExpiredBatch>,
    ) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let join_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        break;
                    }
                    _ = sleep(interval) => {
                        let now = clock.now_millis();
                        let span = info_span!("tombstone.expiry.sweep", now = now);
                        match store.delete_expired(now).instrument(span).await {
                            Ok(ids) if ids.is_empty() => {}
                            Ok(ids) => {
                                event!(Level::INFO, expired = ids.len(), "expired tombstones deleted");
                                if results.send(ExpiredBatch { ids, swept_at: now }).is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                event!(Level::ERROR, error = %err, "expiry sweep failed");
                            }
                        }
                    }
                }
            }
        });

        Self {
            stop_tx: Some(stop_tx),
            join_handle: Some(join_handle),
        }
    }

    /// Signals the worker to stop and waits for it to finish.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.await.map_err(|err| {
                let cause = if err.is_panic() { "panicked" } else { "was cancelled" };
                GraveError::Worker(format!("expiry worker {}: {}", cause, err))
            })?;
        }
        Ok(())
    }
}

impl Drop for ExpiryWorker {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

impl<S: TombstoneStore + 'static, W: World + 'static> TombstoneManager<S, W> {
    /// Apply everything the worker deleted since the last call, then
    /// reconcile the active set: tear down despawned or marker-less
    /// tombstones and re-create missing presentations.
    pub async fn process_expired(&mut self) -> ExpiryReport {
        let mut report = ExpiryReport::default();
        while let Ok(batch) = self.expired_rx.try_recv() {
            report.deleted += batch.ids.len();
            for id in batch.ids {
                let Some(pos) = self.by_id.get(&id).cloned() else {
                    continue;
                };
                if let Some(teardown) = self.teardown(&pos, TeardownMode::MemoryOnly).await {
                    report.torn_down.push(teardown.instance);
                }
            }
        }
        self.reconcile_active(&mut report).await;

        if report.deleted > 0 || !report.torn_down.is_empty() || report.repaired > 0 {
            log::info!(
                "expiry pass: {} deleted, {} torn down, {} repaired",
                report.deleted,
                report.torn_down.len(),
                report.repaired
            );
        }
        report
    }

    /// Run one store sweep on the caller's task and process it immediately.
    pub async fn sweep_expired_now(&mut self) -> ExpiryReport {
        let now = self.now();
        match self.store.delete_expired(now).await {
            Ok(ids) => {
                if self
                    .expired_tx
                    .send(ExpiredBatch { ids, swept_at: now })
                    .is_err()
                {
                    log::warn!("expiry channel closed");
                }
            }
            Err(err) => log::error!("expiry sweep failed: {}", err),
        }
        self.process_expired().await
    }

    async fn reconcile_active(&mut self, report: &mut ExpiryReport) {
        let now = self.now();
        let positions: Vec<Position> = self.instances.keys().cloned().collect();

        for pos in positions {
            let Some(instance) = self.instances.get(&pos) else {
                continue;
            };
            let id = instance.record_id();

            if instance.should_despawn(now) {
                if let Some(teardown) = self.teardown(&pos, TeardownMode::Full).await {
                    report.torn_down.push(teardown.instance);
                }
                continue;
            }
            if !self.world.world_loaded(&pos.world) {
                continue;
            }

            match self.world.marker_tag(&pos) {
                Ok(Some(tag)) if tag == id => {}
                Ok(_) => {
                    log::warn!("marker of tombstone {} at {} is gone, tearing down", id, pos);
                    if let Some(teardown) = self.teardown(&pos, TeardownMode::Full).await {
                        report.torn_down.push(teardown.instance);
                    }
                    continue;
                }
                Err(err) => {
                    log::debug!("marker probe of {} at {} failed: {}", id, pos, err);
                    continue;
                }
            }

            report.repaired += self.repair_presentation(&pos, now);
        }
    }

    fn repair_presentation(&mut self, pos: &Position, now: Millis) -> usize {
        let Some(mut instance) = self.instances.remove(pos) else {
            return 0;
        };
        let mut repaired = 0;
        if self.labels.is_enabled() && (!instance.has_label() || !self.labels.has(pos)) {
            self.present_label(&mut instance, now);
            if instance.has_label() {
                repaired += 1;
            }
        }
        if self.effects.is_enabled() && (!instance.has_effect() || !self.effects.has(pos)) {
            self.present_effect(&mut instance);
            if instance.has_effect() {
                repaired += 1;
            }
        }
        self.instances.insert(pos.clone(), instance);
        repaired
    }
}
