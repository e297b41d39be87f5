//! Tombstone lifecycle orchestration.
//!
//! The manager owns the authoritative map of active instances and drives
//! the store, the world and both presenters through every transition.
//! All mutating calls take `&mut self`; the host keeps the manager on its
//! main domain. The background expiry worker only touches the store and
//! hands deleted ids back through a channel drained by
//! [`TombstoneManager::process_expired`].

pub mod access;
pub mod create;
pub mod expiry;
pub mod guard;
pub mod teardown;

pub use create::CreateRequest;
pub use expiry::{ExpiredBatch, ExpiryReport, ExpiryWorker};
pub use teardown::TeardownMode;

use crate::clock::{Clock, SystemClock};
use crate::core::{GraveError, Millis, OwnerId, Position, RecordId, Result};
use crate::instance::TombstoneInstance;
use crate::policy::TombstoneConfig;
use crate::presenter::{DefaultLabelText, EffectPresenter, LabelContext, LabelPresenter, LabelText};
use crate::storage::TombstoneStore;
use crate::sweeper::{ReconciliationSweeper, SweepReport};
use crate::world::World;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;

/// What startup restoration did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    /// Records already past despawn, deleted instead of restored
    pub expired: usize,
    /// Records whose world is not loaded or whose cell was taken
    pub skipped: usize,
    pub swept: SweepReport,
}

pub struct TombstoneManager<S: TombstoneStore + 'static, W: World + 'static> {
    store: Arc<S>,
    world: Arc<W>,
    config: TombstoneConfig,
    clock: Arc<dyn Clock>,
    label_text: Box<dyn LabelText>,
    labels: LabelPresenter<W>,
    effects: EffectPresenter<W>,
    sweeper: ReconciliationSweeper<W>,
    instances: HashMap<Position, TombstoneInstance>,
    by_id: HashMap<RecordId, Position>,
    expired_tx: mpsc::UnboundedSender<ExpiredBatch>,
    expired_rx: mpsc::UnboundedReceiver<ExpiredBatch>,
    worker: Option<ExpiryWorker>,
    initialized: bool,
}

impl<S: TombstoneStore + 'static, W: World + 'static> TombstoneManager<S, W> {
    pub fn new(store: Arc<S>, world: Arc<W>, config: TombstoneConfig) -> Result<Self> {
        config.validate().map_err(GraveError::Config)?;
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        Ok(Self {
            labels: LabelPresenter::new(
                world.clone(),
                config.label.clone(),
                config.label_sweep_radius,
            ),
            effects: EffectPresenter::new(world.clone(), &config.effect),
            sweeper: ReconciliationSweeper::new(world.clone()),
            store,
            world,
            config,
            clock: Arc::new(SystemClock),
            label_text: Box::new(DefaultLabelText),
            instances: HashMap::new(),
            by_id: HashMap::new(),
            expired_tx,
            expired_rx,
            worker: None,
            initialized: false,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_label_text(mut self, text: impl LabelText + 'static) -> Self {
        self.label_text = Box::new(text);
        self
    }

    pub fn config(&self) -> &TombstoneConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn world(&self) -> &Arc<W> {
        &self.world
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn now(&self) -> Millis {
        self.clock.now_millis()
    }

    // ========================================================================
    // Startup and shutdown
    // ========================================================================

    /// Open the store, purge orphaned artifacts, re-materialize every
    /// persisted record and start the expiry worker.
    ///
    /// Calling this twice is a no-op. The worker is only started when a
    /// tokio runtime is current and the cleanup interval is non-zero.
    pub async fn initialize(&mut self) -> Result<RestoreReport> {
        if self.initialized {
            return Ok(RestoreReport::default());
        }
        self.store.initialize().await?;

        // Nothing is live yet, so every tagged artifact left over from the
        // previous run goes; restoration below re-creates what is still owed.
        let mut report = RestoreReport {
            swept: self.sweeper.cleanup_all(&self.live_ids()),
            ..RestoreReport::default()
        };

        let now = self.now();
        for record in self.store.list_all().await? {
            if record.despawn_time < now {
                match self.store.delete(record.id).await {
                    Ok(_) => report.expired += 1,
                    Err(err) => log::warn!("failed to delete expired tombstone {}: {}", record.id, err),
                }
                continue;
            }
            if !self.world.world_loaded(&record.position.world) {
                log::warn!(
                    "world {} of tombstone {} is not loaded, leaving it dormant",
                    record.position.world,
                    record.id
                );
                report.skipped += 1;
                continue;
            }
            if let Some(existing) = self.instances.get(&record.position) {
                log::warn!(
                    "tombstone {} shares {} with {}, leaving it dormant",
                    record.id,
                    record.position,
                    existing.record_id()
                );
                report.skipped += 1;
                continue;
            }

            let mut instance = TombstoneInstance::from_record(&record);
            self.materialize(&mut instance, now);
            self.register(instance);
            report.restored += 1;
        }

        self.initialized = true;
        self.start_worker();
        log::info!(
            "restored {} tombstones ({} expired, {} skipped, {} orphaned artifacts removed)",
            report.restored,
            report.expired,
            report.skipped,
            report.swept.removed()
        );
        Ok(report)
    }

    fn start_worker(&mut self) {
        if self.worker.is_some() || self.config.cleanup_interval.is_zero() {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            log::warn!("no async runtime available, expiry sweeps must be driven manually");
            return;
        }
        self.worker = Some(ExpiryWorker::spawn(
            self.store.clone(),
            self.clock.clone(),
            self.config.cleanup_interval,
            self.expired_tx.clone(),
        ));
    }

    /// Stop the worker, discard presenter artifacts, forget every instance
    /// and close the store. Markers stay in the world; the next
    /// [`initialize`](Self::initialize) reconciles them.
    pub async fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            if let Err(err) = worker.stop().await {
                log::warn!("expiry worker did not stop cleanly: {}", err);
            }
        }
        let labels = self.labels.shutdown();
        let effects = self.effects.shutdown();
        let active = self.instances.len();
        for instance in self.instances.values_mut() {
            instance.mark_removed();
        }
        self.instances.clear();
        self.by_id.clear();
        while self.expired_rx.try_recv().is_ok() {}

        if let Err(err) = self.store.close().await {
            log::error!("failed to close tombstone store: {}", err);
        }
        self.initialized = false;
        log::info!(
            "tombstone manager stopped ({} active, {} labels, {} effects removed)",
            active,
            labels,
            effects
        );
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub fn get(&self, pos: &Position) -> Option<&TombstoneInstance> {
        self.instances.get(pos)
    }

    pub fn get_by_id(&self, id: RecordId) -> Option<&TombstoneInstance> {
        self.by_id.get(&id).and_then(|pos| self.instances.get(pos))
    }

    /// Record id tagged on the marker block at `pos`, if any.
    pub fn tombstone_id_at(&self, pos: &Position) -> Option<RecordId> {
        match self.world.marker_tag(pos) {
            Ok(tag) => tag,
            Err(err) => {
                log::debug!("marker probe at {} failed: {}", pos, err);
                None
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.instances.len()
    }

    pub fn active(&self) -> impl Iterator<Item = &TombstoneInstance> {
        self.instances.values()
    }

    /// Active tombstones of `owner`, newest first.
    pub fn owner_tombstones(&self, owner: OwnerId) -> Vec<&TombstoneInstance> {
        let mut owned: Vec<&TombstoneInstance> = self
            .instances
            .values()
            .filter(|i| i.owner() == owner)
            .collect();
        owned.sort_by(|a, b| {
            b.death_time()
                .cmp(&a.death_time())
                .then(b.record_id().cmp(&a.record_id()))
        });
        owned
    }

    fn live_ids(&self) -> HashSet<RecordId> {
        self.by_id.keys().copied().collect()
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Remove every tagged artifact in loaded worlds that no active
    /// tombstone owns.
    pub fn cleanup_world(&self) -> SweepReport {
        self.sweeper.cleanup_all(&self.live_ids())
    }

    /// Same as [`cleanup_world`](Self::cleanup_world), limited to the
    /// configured sweep radius around `pos`.
    pub fn cleanup_around(&self, pos: &Position) -> SweepReport {
        self.sweeper
            .cleanup_at(pos, self.config.sweep_radius, &self.live_ids())
    }

    /// Respawn every label so time-dependent lines are current.
    pub fn refresh_labels(&mut self) -> usize {
        if !self.labels.is_enabled() {
            return 0;
        }
        let now = self.now();
        let positions: Vec<Position> = self
            .instances
            .values()
            .filter(|i| i.has_label())
            .map(|i| i.position().clone())
            .collect();

        let mut refreshed = 0;
        for pos in positions {
            let Some(instance) = self.instances.get(&pos) else {
                continue;
            };
            let id = instance.record_id();
            let lines = self.label_lines(instance, now);
            match self.labels.refresh(&pos, id, &lines) {
                Ok(()) => refreshed += 1,
                Err(err) => {
                    log::warn!("failed to refresh label of {} at {}: {}", id, pos, err);
                    if let Some(instance) = self.instances.get_mut(&pos) {
                        instance.set_label(false);
                    }
                }
            }
        }
        refreshed
    }

    // ========================================================================
    // Internals shared by the lifecycle modules
    // ========================================================================

    fn register(&mut self, instance: TombstoneInstance) {
        let pos = instance.position().clone();
        self.by_id.insert(instance.record_id(), pos.clone());
        self.instances.insert(pos, instance);
    }

    fn label_lines(&self, instance: &TombstoneInstance, now: Millis) -> Vec<String> {
        let ctx = LabelContext {
            record_id: instance.record_id(),
            owner: instance.owner(),
            position: instance.position(),
            death_time: instance.death_time(),
            protection_expire: instance.protection_expire(),
            despawn_time: instance.despawn_time(),
            now,
        };
        self.label_text.lines(&ctx)
    }

    /// Place the marker and both presentations. Each flag is set only when
    /// its step succeeded; failures are logged and never abort the rest.
    fn materialize(&mut self, instance: &mut TombstoneInstance, now: Millis) {
        let pos = instance.position().clone();
        let id = instance.record_id();
        match self.world.place_marker(&pos, self.config.marker, id) {
            Ok(()) => instance.set_marker(true),
            Err(err) => log::warn!("marker for tombstone {} at {} not placed: {}", id, pos, err),
        }
        self.present_label(instance, now);
        self.present_effect(instance);
    }

    fn present_label(&mut self, instance: &mut TombstoneInstance, now: Millis) {
        if !self.labels.is_enabled() {
            return;
        }
        let lines = self.label_lines(instance, now);
        match self
            .labels
            .create(instance.position(), instance.record_id(), &lines)
        {
            Ok(()) => instance.set_label(true),
            Err(err) => {
                log::warn!("{}", err);
                instance.set_label(false);
            }
        }
    }

    fn present_effect(&mut self, instance: &mut TombstoneInstance) {
        if !self.effects.is_enabled() {
            return;
        }
        match self
            .effects
            .create(instance.position(), instance.record_id())
        {
            Ok(()) => instance.set_effect(true),
            Err(err) => {
                log::warn!("{}", err);
                instance.set_effect(false);
            }
        }
    }
}
