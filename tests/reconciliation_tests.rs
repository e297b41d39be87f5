//! Drift between durable records and world artifacts

use gravekeeper::ManualClock;
use gravekeeper::policy::MarkerKind;
use gravekeeper::prelude::*;
use gravekeeper::world::{BlockKind, RegionId};
use std::sync::Arc;
use std::time::Duration;

const WORLD: &str = "world";

type Manager = TombstoneManager<FileStore, SimWorld>;

async fn setup() -> (Manager, Arc<FileStore>, Arc<SimWorld>, Arc<ManualClock>) {
    let store = Arc::new(FileStore::new(FileStoreConfig::memory()).unwrap());
    let world = Arc::new(SimWorld::with_worlds(&[WORLD]));
    let clock = Arc::new(ManualClock::new(1_000));
    let mut manager = TombstoneManager::new(
        store.clone(),
        world.clone(),
        TombstoneConfig::default().cleanup_interval(Duration::ZERO),
    )
    .unwrap()
    .with_clock(clock.clone());
    manager.initialize().await.unwrap();
    (manager, store, world, clock)
}

async fn create(manager: &mut Manager, pos: &Position) -> RecordId {
    manager
        .create_tombstone(CreateRequest::new(OwnerId::new_v4(), pos.clone()).experience(3))
        .await
        .instance()
        .unwrap()
        .record_id()
}

#[tokio::test]
async fn test_expired_record_is_gone_after_sweep() {
    let (mut manager, store, _world, clock) = setup().await;
    let old = create(&mut manager, &Position::new(WORLD, 0, 64, 0)).await;
    clock.advance(3_600_000);
    let young_pos = Position::new(WORLD, 20, 64, 0);
    let young = create(&mut manager, &young_pos).await;

    // Both share the default 24h despawn; move past the first only
    clock.set(1_000 + 86_400_001);
    let report = manager.sweep_expired_now().await;

    let remaining: Vec<RecordId> = store
        .list_all()
        .await
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(remaining, vec![young]);
    assert_eq!(report.torn_down.len(), 1);
    assert_eq!(report.torn_down[0].record_id(), old);
    assert!(report.torn_down[0].is_removed());
    assert!(manager.get(&young_pos).is_some());
}

#[tokio::test]
async fn test_replaced_marker_tears_down_on_next_pass() {
    let (mut manager, store, world, _clock) = setup().await;
    let pos = Position::new(WORLD, 0, 64, 0);
    let id = create(&mut manager, &pos).await;

    world.set_block(&pos, BlockKind::Solid("dirt".to_string()));
    let report = manager.process_expired().await;

    assert_eq!(report.torn_down.len(), 1);
    assert!(store.get(id).await.unwrap().is_none());
    assert_eq!(world.label_count(), 0);
    assert_eq!(world.effect_count(), 0);
    assert_eq!(
        world.block_at(&pos).unwrap(),
        BlockKind::Solid("dirt".to_string())
    );
}

#[tokio::test]
async fn test_cleanup_world_survives_broken_region() {
    let (mut manager, _store, world, _clock) = setup().await;
    let live = Position::new(WORLD, 0, 64, 0);
    let id = create(&mut manager, &live).await;

    let broken = Position::new(WORLD, 100, 64, 100);
    let reachable = Position::new(WORLD, -100, 64, -100);
    world.place_marker(&broken, MarkerKind::Chest, RecordId(500)).unwrap();
    world.place_marker(&reachable, MarkerKind::Chest, RecordId(501)).unwrap();
    world.spawn_stray_effect(&reachable, RecordId(501));
    world.inject(|f| {
        f.broken_regions.insert(RegionId::containing(&broken));
    });

    let report = manager.cleanup_world();
    assert_eq!(report.failed_regions, 1);
    assert_eq!(report.markers, 1);
    assert_eq!(report.effects, 1);
    assert_eq!(manager.tombstone_id_at(&live), Some(id));
    assert_eq!(manager.tombstone_id_at(&reachable), None);
    assert_eq!(manager.tombstone_id_at(&broken), Some(RecordId(500)));
}

#[tokio::test]
async fn test_cleanup_around_spares_live_neighbours() {
    let (mut manager, _store, world, _clock) = setup().await;
    let live = Position::new(WORLD, 0, 64, 0);
    let id = create(&mut manager, &live).await;
    let stray = live.offset(2, 0, 2);
    world.place_marker(&stray, MarkerKind::Barrel, RecordId(77)).unwrap();
    world.spawn_stray_label(&stray, RecordId(77));

    let report = manager.cleanup_around(&live);
    assert_eq!(report.markers, 1);
    assert_eq!(report.labels, 1);
    assert_eq!(manager.tombstone_id_at(&live), Some(id));
    assert_eq!(world.labels_at(&live).len(), 2);
}
