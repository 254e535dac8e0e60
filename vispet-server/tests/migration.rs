//! Companions following their owner between worlds.

mod common;

use common::{fox, Harness};

use vispet_core::persistence::InventoryStore;
use vispet_core::types::{InventoryRecord, ItemStack, OwnerId, Position, WorldId};
use vispet_server::components::ContainerKind;
use vispet_server::{EntityStore, ItemContainer};

const ARRIVAL: Position = Position::new(100.0, 70.0, -40.0);

/// Owner summoned in `overworld`, with `nether` open.
fn summoned() -> (Harness, OwnerId) {
    let mut h = Harness::new();
    h.add_world("nether");
    let owner = OwnerId::new();
    h.join("overworld", owner, &["Loot_Fox_Summon"]);
    h.toggle("overworld", owner, fox());
    assert!(h.is_active(&owner));
    (h, owner)
}

#[test]
fn companion_follows_with_its_inventory() {
    let (mut h, owner) = summoned();
    let old_pet = h.companion(&owner);
    h.world("overworld")
        .store
        .container_mut(old_pet, ContainerKind::Hotbar)
        .expect("hotbar")
        .set(7, Some(ItemStack::new("Gold_Bar", 4)));

    h.travel("overworld", "nether", owner, ARRIVAL);

    let report = h.tick("nether");
    assert_eq!(report.migrations, 1);
    assert!(h.is_pending(&owner));
    assert!(h.is_active(&owner), "owner stays active across the move");

    // Phase 1 on the old world.
    h.tick("overworld");
    assert!(!h.store("overworld").contains(old_pet));
    assert!(h.is_pending(&owner));

    // Phase 2 on the new world.
    h.tick("nether");
    assert!(!h.is_pending(&owner));
    assert!(h.is_active(&owner));
    let new_pet = h.companion(&owner);
    assert_ne!(new_pet, old_pet);
    assert_eq!(
        h.runtime.coordinator().index().world_of(&owner),
        Some(WorldId::new("nether"))
    );
    let hotbar = h.store("nether").container(new_pet, ContainerKind::Hotbar).expect("hotbar");
    assert_eq!(hotbar.get(7), Some(&ItemStack::new("Gold_Bar", 4)));
    assert_eq!(h.store("nether").position(new_pet), Some(ARRIVAL));
    assert!(h.notifier.received(&owner, "Pet followed you to the new world!"));

    let player = h.player("nether", &owner);
    let active = h.effects_of(fox()).active;
    assert!(h.store("nether").has_effect(player, active));
    assert_eq!(h.store("overworld").companion_count(), 0);
    assert_eq!(h.store("nether").companion_count(), 1);
}

#[test]
fn grace_window_suppresses_item_checks() {
    let mut h = Harness::with_config(|c| {
        c.trial.grant_on_first_login = false;
        c.lifecycle.world_change_grace_ticks = 5;
    });
    h.add_world("nether");
    let owner = OwnerId::new();
    h.join("overworld", owner, &["Loot_Fox_Summon"]);
    h.toggle("overworld", owner, fox());

    let player = h.travel("overworld", "nether", owner, ARRIVAL);
    h.tick("nether");
    h.tick("overworld");
    h.tick("nether");
    assert!(h.is_active(&owner));
    assert_eq!(h.runtime.coordinator().index().grace_remaining(&owner), Some(5));

    // Inventory not synced yet on the new world.
    h.world("nether").store.take_all(player, "Loot_Fox_Summon");
    for _ in 0..5 {
        assert_eq!(h.tick("nether").despawns, 0);
        assert!(h.is_active(&owner));
    }
    assert_eq!(h.tick("nether").despawns, 1);
    assert!(!h.is_active(&owner));
}

#[test]
fn failed_arrival_abandons_the_companion() {
    let (mut h, owner) = summoned();
    h.world("nether").store.forbid_template(fox().spawn_template);
    let old_pet = h.companion(&owner);
    h.world("overworld")
        .store
        .container_mut(old_pet, ContainerKind::Hotbar)
        .expect("hotbar")
        .set(0, Some(ItemStack::new("Bone", 2)));

    let player = h.travel("overworld", "nether", owner, ARRIVAL);
    h.tick("nether");
    h.tick("overworld");
    h.tick("nether");

    assert!(!h.is_active(&owner));
    assert!(!h.is_pending(&owner));
    assert_eq!(h.store("overworld").companion_count(), 0);
    assert_eq!(h.store("nether").companion_count(), 0);
    let active = h.effects_of(fox()).active;
    assert!(!h.store("nether").has_effect(player, active));

    // Saved by phase 1, so the next summon brings it back.
    let saved = InventoryStore::open(h.dir.path().join("vispet"))
        .expect("open")
        .load(&owner, 54)
        .expect("load");
    assert_eq!(saved, vec![InventoryRecord::new(0, "Bone", 2)]);
}

#[test]
fn closed_old_world_strips_the_marker() {
    let (mut h, owner) = summoned();
    let player = h.travel("overworld", "nether", owner, ARRIVAL);
    let active = h.effects_of(fox()).active;
    h.world("nether").store.add_effect(player, active, 999_999.0).expect("marker carried");

    // Queue shut down while the world is still registered.
    drop(h.worlds.remove("overworld"));

    let report = h.tick("nether");
    assert_eq!(report.migrations, 1);
    assert!(!h.is_active(&owner));
    assert!(!h.is_pending(&owner));
    assert!(!h.store("nether").has_effect(player, active));
    assert_eq!(h.store("nether").companion_count(), 0);
}

#[test]
fn vanished_world_spawns_directly_in_the_new_one() {
    let (mut h, owner) = summoned();
    h.travel("overworld", "nether", owner, ARRIVAL);
    h.remove_world("overworld");

    let report = h.tick("nether");
    assert_eq!(report.migrations, 1);
    assert!(h.is_active(&owner));
    assert!(!h.is_pending(&owner));
    assert_eq!(h.store("nether").companion_count(), 1);
    assert_eq!(
        h.runtime.coordinator().index().world_of(&owner),
        Some(WorldId::new("nether"))
    );
}

#[test]
fn same_world_never_migrates() {
    let (mut h, owner) = summoned();
    let pet = h.companion(&owner);
    for _ in 0..3 {
        assert_eq!(h.tick("overworld").migrations, 0);
    }
    assert_eq!(h.companion(&owner), pet);
}
