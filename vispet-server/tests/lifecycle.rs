//! End-to-end spawn/despawn flows over the simulated host.

mod common;

use common::{cow, fox, Harness};

use vispet_core::ownership::Registration;
use vispet_core::persistence::InventoryStore;
use vispet_core::types::{ItemStack, OwnerId, Position, WorldId};
use vispet_server::commands::CommandError;
use vispet_server::components::{CompanionTag, ContainerKind, SpawnSpec};
use vispet_server::hooks::{check_open, NOT_YOUR_PET};
use vispet_server::trial::ReadyOutcome;
use vispet_server::{DespawnOutcome, DespawnReason, EntityStore, ItemContainer};

// ---------------------------------------------------------------------------
// Toggle
// ---------------------------------------------------------------------------

#[test]
fn toggle_summons_then_dismisses() {
    let mut h = Harness::new();
    let owner = OwnerId::new();
    let (player, outcome) = h.join("overworld", owner, &["Loot_Fox_Summon"]);
    assert_eq!(outcome, ReadyOutcome::Idle);

    h.toggle("overworld", owner, fox());
    assert!(h.is_active(&owner));
    assert_eq!(h.store("overworld").companion_count(), 1);
    let pet = h.companion(&owner);
    assert_eq!(h.store("overworld").appearance(pet), Some(("Fox", 1.0)));
    let active = h.effects_of(fox()).active;
    assert_eq!(h.store("overworld").effect_duration(player, active), Some(999_999.0));
    assert!(h.notifier.received(&owner, "Pet summoned!"));

    h.toggle("overworld", owner, fox());
    assert!(!h.is_active(&owner));
    assert_eq!(h.store("overworld").companion_count(), 0);
    assert!(!h.store("overworld").has_effect(player, active));
    assert!(h.notifier.received(&owner, "Pet dismissed."));
}

#[test]
fn held_toggle_fires_once() {
    let mut h = Harness::new();
    let owner = OwnerId::new();
    h.join("overworld", owner, &["Loot_Fox_Summon"]);

    h.press("overworld", owner, fox());
    let spawns: usize = (0..10).map(|_| h.tick("overworld").spawns).sum();
    assert_eq!(spawns, 1);
    assert_eq!(h.store("overworld").companion_count(), 1);
}

#[test]
fn rapid_toggles_while_pending_never_double_spawn() {
    let mut h = Harness::new();
    let owner = OwnerId::new();
    h.join("overworld", owner, &["Loot_Fox_Summon"]);

    h.press("overworld", owner, fox());
    assert_eq!(h.detect("overworld").spawns, 1);
    assert!(h.is_pending(&owner));

    h.release("overworld", owner);
    h.detect("overworld");
    h.press("overworld", owner, fox());
    assert_eq!(h.detect("overworld").spawns, 0, "toggle dropped while pending");

    h.drain("overworld");
    h.release("overworld", owner);
    h.tick("overworld");
    assert!(h.is_active(&owner));
    assert_eq!(h.store("overworld").companion_count(), 1);
}

#[test]
fn variant_sets_appearance_scale_and_capacity() {
    let mut h = Harness::new();
    let owner = OwnerId::new();
    h.join("overworld", owner, &["Loot_Cow_Summon"]);
    h.toggle("overworld", owner, cow());

    let pet = h.companion(&owner);
    let store = h.store("overworld");
    assert_eq!(store.appearance(pet), Some(("Cow_Undead", 0.5)));
    let hotbar = store.container(pet, ContainerKind::Hotbar).expect("hotbar");
    assert_eq!(hotbar.capacity(), 54);
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[test]
fn inventory_survives_dismiss_and_resummon() {
    let mut h = Harness::new();
    let owner = OwnerId::new();
    h.join("overworld", owner, &["Loot_Fox_Summon"]);
    h.toggle("overworld", owner, fox());

    let pet = h.companion(&owner);
    {
        let hotbar = h
            .world("overworld")
            .store
            .container_mut(pet, ContainerKind::Hotbar)
            .expect("hotbar");
        hotbar.set(3, Some(ItemStack::new("Iron_Ore", 12)));
        hotbar.set(40, Some(ItemStack::new("Bone", 1)));
    }
    h.toggle("overworld", owner, fox());
    assert!(!h.is_active(&owner));

    let saved = InventoryStore::open(h.dir.path().join("vispet"))
        .expect("open")
        .load(&owner, 54)
        .expect("load");
    assert_eq!(saved.len(), 2);

    h.toggle("overworld", owner, fox());
    let pet = h.companion(&owner);
    let hotbar = h.store("overworld").container(pet, ContainerKind::Hotbar).expect("hotbar");
    assert_eq!(hotbar.get(3), Some(&ItemStack::new("Iron_Ore", 12)));
    assert_eq!(hotbar.get(40), Some(&ItemStack::new("Bone", 1)));
}

// ---------------------------------------------------------------------------
// System despawns
// ---------------------------------------------------------------------------

#[test]
fn losing_every_summon_item_dismisses() {
    let mut h = Harness::new();
    let owner = OwnerId::new();
    let (player, _) = h.join("overworld", owner, &["Loot_Fox_Summon"]);
    h.toggle("overworld", owner, fox());
    assert!(h.is_active(&owner));

    h.world("overworld").store.take_all(player, "Loot_Fox_Summon");
    let report = h.tick("overworld");
    assert_eq!(report.despawns, 1);
    assert!(!h.is_active(&owner));
    assert_eq!(h.store("overworld").companion_count(), 0);
    assert!(!h.notifier.received(&owner, "Pet dismissed."), "background despawn is silent");
}

#[test]
fn disconnect_during_pending_spawn_is_deferred() {
    let mut h = Harness::new();
    let owner = OwnerId::new();
    h.join("overworld", owner, &["Loot_Fox_Summon"]);

    h.press("overworld", owner, fox());
    h.detect("overworld");
    assert!(h.is_pending(&owner));

    let outcome = h.runtime.hooks().on_disconnect(owner);
    assert_eq!(outcome, DespawnOutcome::Deferred);

    h.drain("overworld");
    assert!(h.is_active(&owner), "spawn completes first");
    h.world("overworld").store.take_player(&owner);

    h.tick("overworld");
    assert!(!h.is_active(&owner));
    assert_eq!(h.store("overworld").companion_count(), 0);
    assert_eq!(h.runtime.coordinator().deferred_count(), 0);
}

#[test]
fn user_despawn_while_pending_is_dropped() {
    let mut h = Harness::new();
    let owner = OwnerId::new();
    h.join("overworld", owner, &["Loot_Fox_Summon"]);
    h.press("overworld", owner, fox());
    h.detect("overworld");

    let outcome = h.runtime.coordinator().despawn(owner, DespawnReason::Command);
    assert_eq!(outcome, DespawnOutcome::Dropped);
    h.drain("overworld");
    h.tick("overworld");
    assert!(h.is_active(&owner));
}

#[test]
fn failed_spawn_leaves_owner_idle() {
    let mut h = Harness::new();
    let owner = OwnerId::new();
    h.join("overworld", owner, &["Loot_Fox_Summon"]);
    h.world("overworld").store.forbid_template(fox().spawn_template);

    h.toggle("overworld", owner, fox());
    assert!(!h.is_active(&owner));
    assert!(!h.is_pending(&owner));
    assert_eq!(h.store("overworld").companion_count(), 0);
    assert!(h.notifier.received(&owner, "Could not summon"));
}

#[test]
fn toggle_in_unregistered_world_tells_the_owner() {
    let mut h = Harness::new();
    let owner = OwnerId::new();
    h.join("overworld", owner, &["Loot_Fox_Summon"]);
    h.runtime.close_world(&WorldId::new("overworld"));

    h.press("overworld", owner, fox());
    let report = h.detect("overworld");
    assert_eq!(report.spawns, 1);
    assert!(!h.is_active(&owner));
    assert!(!h.is_pending(&owner));
    assert!(h.notifier.received(&owner, "Could not summon your pet."));
}

#[test]
fn dropped_task_releases_pending() {
    let mut h = Harness::new();
    let owner = OwnerId::new();
    h.add_world("arena");
    h.join("arena", owner, &["Loot_Fox_Summon"]);
    h.press("arena", owner, fox());
    h.detect("arena");
    assert!(h.is_pending(&owner));

    h.remove_world("arena");
    assert!(!h.is_pending(&owner));
    assert!(!h.is_active(&owner));
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

#[test]
fn orphans_from_a_previous_session_are_removed() {
    let mut h = Harness::new();
    let owner = OwnerId::new();
    let (player, _) = h.join("overworld", owner, &["Loot_Fox_Summon"]);
    h.toggle("overworld", owner, fox());

    let store = &mut h.world("overworld").store;
    for stale_owner in [OwnerId::new(), OwnerId::new()] {
        let e = store
            .spawn(&SpawnSpec::for_descriptor(fox(), Position::default()))
            .expect("spawn");
        store.set_companion_tag(e, CompanionTag { owner: stale_owner }).expect("tag");
    }
    store
        .spawn(&SpawnSpec::for_descriptor(cow(), Position::default()))
        .expect("untagged");
    assert_eq!(store.companion_count(), 4);

    let report = h.tick("overworld");
    assert_eq!(report.sweep.removed, 3);
    assert_eq!(
        h.store("overworld").companion_count(),
        h.runtime.coordinator().index().active_count()
    );
    assert!(h.store("overworld").contains(h.companion(&owner)));
    assert!(h.store("overworld").contains(player));
}

#[test]
fn duplicate_registration_keeps_only_the_registered_entity() {
    let mut h = Harness::new();
    let owner = OwnerId::new();
    let (player, _) = h.join("overworld", owner, &["Loot_Fox_Summon"]);
    let store = &mut h.world("overworld").store;
    let first = store
        .spawn(&SpawnSpec::for_descriptor(fox(), Position::default()))
        .expect("spawn");
    let second = store
        .spawn(&SpawnSpec::for_descriptor(fox(), Position::default()))
        .expect("spawn");
    for e in [first, second] {
        store.set_inventory_capacity(e, 54).expect("capacity");
        store.set_companion_tag(e, CompanionTag { owner }).expect("tag");
    }
    h.runtime.coordinator().index().register(
        owner,
        Registration {
            world: WorldId::new("overworld"),
            companion: second,
            owner_entity: player,
            pet_type: fox(),
        },
    );

    h.tick("overworld");
    assert!(!h.store("overworld").contains(first));
    assert!(h.store("overworld").contains(second));
}

#[test]
fn stale_markers_stripped_on_ready() {
    let mut h = Harness::new();
    let owner = OwnerId::new();
    let active = h.effects_of(cow()).active;
    let store = &mut h.world("overworld").store;
    let player = store.add_player(owner, Position::default());
    store.add_effect(player, active, 999_999.0).expect("effect");

    let hooks = h.runtime.hooks().clone();
    hooks.on_ready(&mut h.world("overworld").store, owner, player);
    assert!(!h.store("overworld").has_effect(player, active));
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[test]
fn pet_open_and_close() {
    let mut h = Harness::new();
    let owner = OwnerId::new();
    let stranger = OwnerId::new();
    h.join("overworld", owner, &["Loot_Fox_Summon"]);
    h.toggle("overworld", owner, fox());
    let pet = h.companion(&owner);
    let commands = h.runtime.commands().clone();

    let view = commands.pet_open(h.store("overworld"), owner).expect("open");
    assert_eq!(view.companion, pet);
    assert_eq!(view.capacity, 54);

    let index = h.runtime.coordinator().index().clone();
    assert_eq!(check_open(&index, h.store("overworld"), owner, pet), Ok(()));
    assert_eq!(check_open(&index, h.store("overworld"), stranger, pet), Err(NOT_YOUR_PET));
    let err = commands
        .open_companion(h.store("overworld"), stranger, pet)
        .expect_err("not owner");
    assert_eq!(err.to_string(), "This is not your pet!");

    assert!(commands.pet_close(owner).is_ok());
    h.tick("overworld");
    assert!(!h.is_active(&owner));
    assert!(matches!(commands.pet_open(h.store("overworld"), owner), Err(CommandError::NoPet)));
    assert!(matches!(commands.pet_close(owner), Err(CommandError::NoPet)));
}

#[test]
fn tagged_but_unregistered_companion_cannot_be_opened() {
    let mut h = Harness::new();
    let owner = OwnerId::new();
    h.join("overworld", owner, &["Loot_Fox_Summon"]);
    let store = &mut h.world("overworld").store;
    let stray = store
        .spawn(&SpawnSpec::for_descriptor(fox(), Position::default()))
        .expect("spawn");
    store.set_inventory_capacity(stray, 54).expect("capacity");
    store.set_companion_tag(stray, CompanionTag { owner }).expect("tag");
    assert!(!h.is_active(&owner));

    let index = h.runtime.coordinator().index().clone();
    assert_eq!(check_open(&index, h.store("overworld"), owner, stray), Err(NOT_YOUR_PET));
    let err = h
        .runtime
        .commands()
        .open_companion(h.store("overworld"), owner, stray)
        .expect_err("unregistered");
    assert!(matches!(err, CommandError::NotYourPet));
}

#[test]
fn status_reports_companion_as_json() {
    let mut h = Harness::new();
    let owner = OwnerId::new();
    h.join("overworld", owner, &["Loot_Fox_Summon"]);
    h.toggle("overworld", owner, fox());

    let json = h.runtime.commands().status_json(owner).expect("json");
    let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
    assert_eq!(value["active"], serde_json::Value::Bool(true));
    assert_eq!(value["world"], "overworld");
    assert_eq!(value["pet_type"], "loot_buddy");
    assert!(value["trial"].is_null());
}
