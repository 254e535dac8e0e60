//! Following the owner across worlds.
//!
//! Entities cannot move between worlds, so a companion whose owner changed
//! worlds is recreated in two phases that each run on their own world's
//! thread:
//!
//! 1. Old world: save the inventory, remove the entity, drop the entity
//!    reference from the index. The owner stays active.
//! 2. New world: run the normal spawn against the saved inventory.
//!
//! Phase 2 is enqueued from inside phase 1, so it can never observe the
//! old entity. The owner's pending marker is held across both phases.

use tracing::{debug, info, warn};

use vispet_core::types::{EntityRef, OwnerId, Position, WorldId};

use crate::coordinator::{LifecycleCoordinator, SpawnMode, SpawnRequest};

/// Detects world changes and relocates companions.
#[derive(Debug, Clone)]
pub struct WorldMigrationHandler {
    coordinator: LifecycleCoordinator,
}

impl WorldMigrationHandler {
    /// Create a handler driving the given coordinator.
    #[must_use]
    pub fn new(coordinator: LifecycleCoordinator) -> Self {
        Self { coordinator }
    }

    /// Start a migration if the owner's companion lives in another world.
    ///
    /// `position` is the owner's position in `current_world`; without one
    /// the configured fallback is used. Returns `true` if a migration was
    /// started.
    pub fn check(
        &self,
        owner: OwnerId,
        owner_entity: EntityRef,
        current_world: &WorldId,
        position: Option<Position>,
    ) -> bool {
        let index = self.coordinator.index();
        if !index.is_active(&owner) || index.is_pending(&owner) {
            return false;
        }
        if index.world_of(&owner).as_ref() == Some(current_world) {
            return false;
        }
        let Some(guard) = index.try_begin(owner) else {
            return false;
        };
        // Re-read under the guard: a despawn may have finished in between.
        if !index.is_active(&owner) {
            return false;
        }
        let Some(companion_world) = index.world_of(&owner) else {
            return false;
        };
        if companion_world == *current_world {
            return false;
        }
        let Some(pet_type) = index.pet_type(&owner) else {
            return false;
        };

        let lifecycle = self.coordinator.lifecycle();
        index.set_grace(owner, lifecycle.world_change_grace_ticks);
        let request = SpawnRequest {
            owner,
            owner_entity,
            world: current_world.clone(),
            position: position.unwrap_or(lifecycle.migration_fallback_position),
            pet_type,
        };
        info!(owner = %owner, from = %companion_world, to = %current_world, "Companion migration started");

        let Some(old) = self.coordinator.worlds().get(&companion_world) else {
            // Old world is gone and took the entity with it.
            index.detach_companion(&owner);
            self.coordinator.spawn_held(request, SpawnMode::Migrated, guard);
            return true;
        };

        let coordinator = self.coordinator.clone();
        let enqueued = old.execute("migrate_out", move |store| {
            if let Some(entity) = coordinator.index().detach_companion(&owner) {
                coordinator.save_inventory(store, owner, entity);
                store.remove(entity);
                debug!(owner = %owner, companion = %entity, "Companion removed from old world");
            }
            coordinator.spawn_held(request, SpawnMode::Migrated, guard);
            Ok(())
        });
        if let Err(e) = enqueued {
            warn!(owner = %owner, world = %companion_world, error = %e, "Old world closed during migration");
            self.coordinator.strip_marker_remote(owner, Some(pet_type));
            self.coordinator.abandon(&owner);
        }
        true
    }
}
