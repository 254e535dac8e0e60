//! Per-tick companion systems.
//!
//! The host calls [`CompanionSystems::tick_world`] once per world per
//! simulation tick, on that world's thread, then drains the world's queue.
//! Detection reads the store directly; every spawn or despawn it triggers
//! goes through the coordinator and lands on a queue.
//!
//! ## Per-owner order
//!
//! | Step        | Effect                                             |
//! |-------------|----------------------------------------------------|
//! | Toggle      | Rising edge of a toggle signal spawns or despawns  |
//! | Migration   | Companion in another world is relocated            |
//! | Item lost   | No summon item held (outside grace) despawns       |
//!
//! After every owner is processed the orphan sweep runs over the world.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace, warn};

use vispet_core::descriptor::{self, PetTypeDescriptor, PET_TYPES};
use vispet_core::toggle::{ToggleAction, ToggleDetector, ToggleInput};
use vispet_core::types::{EntityRef, ItemStack, OwnerId};

use crate::components::ContainerKind;
use crate::coordinator::{DespawnReason, LifecycleCoordinator, SpawnRejected, SpawnRequest};
use crate::host::EntityStore;
use crate::migration::WorldMigrationHandler;
use crate::orphan::{OrphanReconciler, SweepReport};

/// What one world tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Players processed.
    pub owners: usize,
    /// Spawns requested.
    pub spawns: usize,
    /// Despawns requested (toggle or item lost).
    pub despawns: usize,
    /// Migrations started.
    pub migrations: usize,
    /// Deferred despawns retried.
    pub deferred_flushed: usize,
    /// Orphan sweep results.
    pub sweep: SweepReport,
}

/// Runs detection for every owner and reconciliation for every world.
#[derive(Debug, Clone)]
pub struct CompanionSystems {
    coordinator: LifecycleCoordinator,
    migration: WorldMigrationHandler,
    reconciler: OrphanReconciler,
    detector: Arc<ToggleDetector>,
}

impl CompanionSystems {
    /// Wire the systems.
    #[must_use]
    pub fn new(coordinator: LifecycleCoordinator, detector: Arc<ToggleDetector>) -> Self {
        let migration = WorldMigrationHandler::new(coordinator.clone());
        let reconciler = OrphanReconciler::new(Arc::clone(coordinator.index()), coordinator.lifecycle());
        Self {
            coordinator,
            migration,
            reconciler,
            detector,
        }
    }

    /// The shared toggle detector.
    #[must_use]
    pub fn detector(&self) -> &Arc<ToggleDetector> {
        &self.detector
    }

    /// One simulation tick for one world.
    pub fn tick_world(&self, store: &mut dyn EntityStore) -> TickReport {
        let start = Instant::now();
        let mut report = TickReport {
            deferred_flushed: self.coordinator.flush_deferred(),
            ..TickReport::default()
        };
        for (owner, player) in store.players() {
            report.owners += 1;
            self.tick_owner(&*store, owner, player, &mut report);
        }
        report.sweep = self.reconciler.sweep(store);
        trace!(
            world = %store.world(),
            owners = report.owners,
            elapsed_us = start.elapsed().as_micros(),
            "Companion tick"
        );
        report
    }

    fn tick_owner(&self, store: &dyn EntityStore, owner: OwnerId, player: EntityRef, report: &mut TickReport) {
        let index = self.coordinator.index();
        self.coordinator.note_player_world(owner, store.world());

        let input = ToggleInput {
            signal: self.toggle_signal(store, player),
            pending: index.is_pending(&owner),
            active: index.is_active(&owner),
        };
        match self.detector.observe(owner, input) {
            Some(ToggleAction::Spawn(pet_type)) => {
                self.request_spawn(store, owner, player, pet_type);
                report.spawns += 1;
                return;
            }
            Some(ToggleAction::Despawn) => {
                self.coordinator.despawn(owner, DespawnReason::Toggle);
                report.despawns += 1;
                return;
            }
            None => {}
        }

        if self
            .migration
            .check(owner, player, store.world(), store.position(player))
        {
            report.migrations += 1;
            return;
        }

        if !index.is_active(&owner) || index.is_pending(&owner) {
            return;
        }
        if index.tick_grace(&owner) {
            return;
        }
        if !self.holds_summon_item(store, player) {
            debug!(owner = %owner, "Owner no longer holds a summon item");
            self.coordinator.despawn(owner, DespawnReason::ItemLost);
            report.despawns += 1;
        }
    }

    /// First descriptor, in table order, whose toggle effect is on the player.
    fn toggle_signal(&self, store: &dyn EntityStore, player: EntityRef) -> Option<&'static PetTypeDescriptor> {
        let registry = self.coordinator.effects();
        PET_TYPES.iter().find(|t| {
            t.effects(registry)
                .is_some_and(|effects| store.has_effect(player, effects.toggle))
        })
    }

    fn request_spawn(
        &self,
        store: &dyn EntityStore,
        owner: OwnerId,
        player: EntityRef,
        pet_type: &'static PetTypeDescriptor,
    ) {
        let request = SpawnRequest {
            owner,
            owner_entity: player,
            world: store.world().clone(),
            position: store
                .position(player)
                .unwrap_or(self.coordinator.lifecycle().migration_fallback_position),
            pet_type,
        };
        match self.coordinator.spawn(request) {
            Ok(()) => {}
            Err(rejected @ (SpawnRejected::AlreadyActive(_) | SpawnRejected::AlreadyPending(_))) => {
                debug!(owner = %owner, reason = %rejected, "Spawn raced another operation, rearming toggle");
                self.detector.rearm(&owner);
            }
            Err(rejected) => {
                warn!(owner = %owner, reason = %rejected, "Spawn rejected");
                self.coordinator.notifier().notify(&owner, "Could not summon your pet.");
            }
        }
    }

    fn holds_summon_item(&self, store: &dyn EntityStore, player: EntityRef) -> bool {
        let trial_item = self.coordinator.trial_item();
        ContainerKind::ALL.iter().any(|kind| {
            store
                .container(player, *kind)
                .and_then(|c| c.find(&|s: &ItemStack| descriptor::is_summon_item(&s.item_id, trial_item)))
                .is_some()
        })
    }
}
