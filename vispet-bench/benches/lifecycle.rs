//! VisPet Benchmark Suite
//!
//! Per-tick costs on the world threads:
//!   toggle_detection_100_owners ...... edge detection only
//!   world_tick_50_summoned ........... steady-state tick, nothing changes
//!   orphan_sweep_150_orphans ......... sweep over a world full of leftovers
//!   inventory_codec_54_slots ......... save/load text format

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use vispet_core::clock::ManualClock;
use vispet_core::config::VisPetConfig;
use vispet_core::descriptor::PET_TYPES;
use vispet_core::ownership::OwnershipIndex;
use vispet_core::persistence::{format_inventory, parse_inventory};
use vispet_core::toggle::{ToggleDetector, ToggleInput};
use vispet_core::types::{InventoryRecord, ItemStack, OwnerId, Position, WorldId};
use vispet_server::components::{CompanionTag, SpawnSpec};
use vispet_server::orphan::OrphanReconciler;
use vispet_server::sim::{RecordingNotifier, SimStore, StaticEffects};
use vispet_server::{EntityStore, VisPetRuntime};

fn bench_toggle_detection(c: &mut Criterion) {
    let detector = ToggleDetector::new();
    let owners: Vec<OwnerId> = (0..100).map(|_| OwnerId::new()).collect();

    c.bench_function("toggle_detection_100_owners", |b| {
        let mut tick = 0u64;
        b.iter(|| {
            tick += 1;
            for (i, owner) in owners.iter().enumerate() {
                let held = (tick + i as u64) % 4 < 2;
                let input = ToggleInput {
                    signal: held.then_some(&PET_TYPES[i % PET_TYPES.len()]),
                    pending: false,
                    active: i % 2 == 0,
                };
                black_box(detector.observe(*owner, black_box(input)));
            }
        });
    });
}

fn bench_world_tick(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = VisPetConfig::default();
    config.persistence.inventory_dir = dir.path().join("vispet");
    config.persistence.trial_dir = dir.path().join("freepet");
    config.trial.grant_on_first_login = false;

    let effects = StaticEffects::standard();
    let runtime = VisPetRuntime::new(
        config,
        Arc::new(ManualClock::new(0)),
        Arc::new(effects.clone()),
        Arc::new(RecordingNotifier::new()),
    )
    .expect("runtime");
    let mut thread = runtime.open_world(WorldId::new("overworld"));
    let mut store = SimStore::new("overworld");

    // Summon a companion for every player.
    let mut players = Vec::new();
    for i in 0..50 {
        let owner = OwnerId::new();
        let player = store.add_player(owner, Position::new(f64::from(i) * 4.0, 64.0, 0.0));
        store.give(player, ItemStack::new("Loot_Fox_Summon", 1));
        players.push(player);
    }
    let toggle = PET_TYPES[0].effects(&effects).expect("effects").toggle;
    for player in &players {
        store.add_effect(*player, toggle, 0.5).expect("effect");
    }
    runtime.tick_world(&mut store, &mut thread);
    for player in &players {
        store.remove_effect(*player, toggle);
    }
    runtime.tick_world(&mut store, &mut thread);

    c.bench_function("world_tick_50_summoned", |b| {
        b.iter(|| black_box(runtime.tick_world(&mut store, &mut thread)));
    });
}

fn bench_orphan_sweep(c: &mut Criterion) {
    let index = Arc::new(OwnershipIndex::new());
    let reconciler = OrphanReconciler::new(Arc::clone(&index), &VisPetConfig::default().lifecycle);

    let setup = || {
        let mut store = SimStore::new("overworld");
        for _ in 0..150 {
            let e = store
                .spawn(&SpawnSpec::for_descriptor(&PET_TYPES[0], Position::default()))
                .expect("spawn");
            store
                .set_companion_tag(e, CompanionTag { owner: OwnerId::new() })
                .expect("tag");
        }
        store
    };

    c.bench_function("orphan_sweep_150_orphans", |b| {
        b.iter_batched(
            setup,
            |mut store| black_box(reconciler.sweep(&mut store)),
            BatchSize::SmallInput,
        );
    });
}

fn bench_inventory_codec(c: &mut Criterion) {
    let records: Vec<InventoryRecord> = (0..54)
        .map(|slot| InventoryRecord::new(slot, format!("Item_{slot}"), u32::from(slot) + 1))
        .collect();

    c.bench_function("inventory_codec_54_slots", |b| {
        b.iter(|| {
            let text = format_inventory(black_box(&records));
            black_box(parse_inventory(&text, 54));
        });
    });
}

criterion_group!(
    benches,
    bench_toggle_detection,
    bench_world_tick,
    bench_orphan_sweep,
    bench_inventory_codec,
);
criterion_main!(benches);
