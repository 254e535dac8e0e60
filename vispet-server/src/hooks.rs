//! Integration points for the host's connection and interaction events.
//!
//! The host calls these from its own event handlers: `on_ready` when a
//! player has finished joining a world, `on_disconnect` when they leave,
//! and [`check_open`] before showing a companion's inventory to anyone.

use std::sync::Arc;

use tracing::{debug, info};

use vispet_core::descriptor::PET_TYPES;
use vispet_core::ownership::OwnershipIndex;
use vispet_core::toggle::ToggleDetector;
use vispet_core::types::{EntityRef, OwnerId};

use crate::coordinator::{DespawnOutcome, DespawnReason, LifecycleCoordinator};
use crate::host::EntityStore;
use crate::trial::{ReadyOutcome, TrialTimerService};

/// Message shown to anyone opening a companion they do not own.
pub const NOT_YOUR_PET: &str = "This is not your pet!";

/// Connection and interaction hooks.
#[derive(Debug, Clone)]
pub struct ConnectionHooks {
    coordinator: LifecycleCoordinator,
    trial: Arc<TrialTimerService>,
    detector: Arc<ToggleDetector>,
}

impl ConnectionHooks {
    /// Wire the hooks.
    #[must_use]
    pub fn new(coordinator: LifecycleCoordinator, trial: Arc<TrialTimerService>, detector: Arc<ToggleDetector>) -> Self {
        Self {
            coordinator,
            trial,
            detector,
        }
    }

    /// A player finished joining a world. Runs on that world's thread.
    pub fn on_ready(&self, store: &mut dyn EntityStore, owner: OwnerId, player: EntityRef) -> ReadyOutcome {
        self.coordinator.note_player_world(owner, store.world());
        let stripped = self.clean_stale_markers(store, owner, player);
        if stripped > 0 {
            info!(owner = %owner, stripped, "Removed stale companion markers");
        }
        self.trial.on_ready(store, owner, player)
    }

    /// A player left. Their companion is despawned (or the despawn waits
    /// for an in-flight operation) and trial time is settled.
    pub fn on_disconnect(&self, owner: OwnerId) -> DespawnOutcome {
        self.detector.forget(&owner);
        let outcome = self.coordinator.despawn(owner, DespawnReason::Disconnect);
        if outcome == DespawnOutcome::NotActive {
            self.trial.on_disconnect(&owner);
        }
        self.coordinator.forget_player(&owner);
        debug!(owner = %owner, outcome = ?outcome, "Owner disconnected");
        outcome
    }

    /// Active markers left on a player without a companion (crash,
    /// restart) are removed.
    fn clean_stale_markers(&self, store: &mut dyn EntityStore, owner: OwnerId, player: EntityRef) -> usize {
        let index = self.coordinator.index();
        if index.is_active(&owner) || index.is_pending(&owner) {
            return 0;
        }
        let registry = self.coordinator.effects();
        PET_TYPES
            .iter()
            .filter_map(|t| t.effects(registry))
            .filter(|effects| store.remove_effect(player, effects.active))
            .count()
    }
}

/// Whether `opener` may open `companion`'s inventory.
///
/// The entity must carry the opener's tag and be the companion the index
/// has registered for them in this world. Orphans and stale duplicates
/// are refused even when tagged.
///
/// # Errors
/// Returns the message to show when the companion belongs to someone else.
pub fn check_open(
    index: &OwnershipIndex,
    store: &dyn EntityStore,
    opener: OwnerId,
    companion: EntityRef,
) -> Result<(), &'static str> {
    let tagged = store
        .companions()
        .into_iter()
        .any(|(entity, tag)| entity == companion && tag.is_some_and(|t| t.owner == opener));
    if tagged && index.is_registered_companion(&opener, store.world(), companion) {
        Ok(())
    } else {
        Err(NOT_YOUR_PET)
    }
}
