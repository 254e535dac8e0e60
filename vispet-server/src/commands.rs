//! Player and admin commands.
//!
//! | Command         | Who    | Effect                                   |
//! |-----------------|--------|------------------------------------------|
//! | `petopen`       | player | Show the companion's inventory           |
//! | `petclose`      | player | Dismiss the companion                    |
//! | `givefreepet`   | admin  | Reset and grant a fresh trial item       |
//! | `clearfreepets` | admin  | Delete every trial record                |
//! | `status`        | any    | JSON snapshot of an owner's companion    |

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use vispet_core::types::{EntityRef, InventoryRecord, OwnerId};

use crate::components::ContainerKind;
use crate::coordinator::{DespawnOutcome, DespawnReason, LifecycleCoordinator};
use crate::host::EntityStore;
use crate::hooks::{check_open, NOT_YOUR_PET};
use crate::trial::{GrantError, TrialTimerService};

/// Why a command did nothing.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The caller has no companion.
    #[error("You don't have an active pet.")]
    NoPet,
    /// The companion is in another world than the caller.
    #[error("Your pet is in another world.")]
    ElsewhereWorld,
    /// Another spawn or despawn is still running.
    #[error("Your pet is busy, try again in a moment.")]
    Busy,
    /// The companion belongs to someone else.
    #[error("{}", NOT_YOUR_PET)]
    NotYourPet,
    /// A trial grant failed.
    #[error("Could not grant free pet: {0}")]
    Grant(#[from] GrantError),
    /// Persistence failure.
    #[error("Storage error: {0}")]
    Store(#[from] vispet_core::VisPetError),
    /// Status could not be encoded.
    #[error("Could not encode status: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A companion's inventory as shown by `petopen`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompanionView {
    /// The companion entity.
    pub companion: EntityRef,
    /// Occupied hotbar slots.
    pub items: Vec<InventoryRecord>,
    /// Hotbar size.
    pub capacity: u16,
}

/// Trial part of a status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct TrialStatus {
    /// Ever granted.
    pub received: bool,
    /// Budget left, counting a running interval.
    pub remaining_ms: i64,
    /// Formatted budget.
    pub remaining: String,
    /// Summoned right now.
    pub running: bool,
}

/// `status` snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// The owner.
    pub owner: OwnerId,
    /// Has a companion.
    pub active: bool,
    /// Operation in flight.
    pub pending: bool,
    /// Companion's world.
    pub world: Option<String>,
    /// Companion entity.
    pub companion: Option<EntityRef>,
    /// Spawn template in effect.
    pub pet_type: Option<&'static str>,
    /// World-change grace ticks left.
    pub grace_ticks: Option<u32>,
    /// Trial state, if ever granted.
    pub trial: Option<TrialStatus>,
}

/// Executes commands against the lifecycle.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    coordinator: LifecycleCoordinator,
    trial: Arc<TrialTimerService>,
}

impl CommandHandler {
    /// Wire the handler.
    #[must_use]
    pub fn new(coordinator: LifecycleCoordinator, trial: Arc<TrialTimerService>) -> Self {
        Self { coordinator, trial }
    }

    /// `petopen`: the caller's companion inventory. Runs on the caller's
    /// world thread.
    ///
    /// # Errors
    /// [`CommandError::NoPet`] without a companion,
    /// [`CommandError::ElsewhereWorld`] if it lives in another world.
    pub fn pet_open(&self, store: &dyn EntityStore, owner: OwnerId) -> Result<CompanionView, CommandError> {
        let index = self.coordinator.index();
        if !index.is_active(&owner) {
            return Err(CommandError::NoPet);
        }
        let companion = index.companion(&owner).ok_or(CommandError::Busy)?;
        if index.world_of(&owner).as_ref() != Some(store.world()) {
            return Err(CommandError::ElsewhereWorld);
        }
        self.open_companion(store, owner, companion)
    }

    /// Open a specific companion's inventory, enforcing ownership.
    ///
    /// # Errors
    /// [`CommandError::NotYourPet`] if `opener` does not own it.
    pub fn open_companion(
        &self,
        store: &dyn EntityStore,
        opener: OwnerId,
        companion: EntityRef,
    ) -> Result<CompanionView, CommandError> {
        check_open(self.coordinator.index(), store, opener, companion).map_err(|_| CommandError::NotYourPet)?;
        let hotbar = store
            .container(companion, ContainerKind::Hotbar)
            .ok_or(CommandError::NoPet)?;
        Ok(CompanionView {
            companion,
            items: hotbar.snapshot(),
            capacity: hotbar.capacity(),
        })
    }

    /// `petclose`: dismiss the caller's companion.
    ///
    /// # Errors
    /// [`CommandError::NoPet`] without a companion,
    /// [`CommandError::Busy`] while an operation is in flight.
    pub fn pet_close(&self, owner: OwnerId) -> Result<&'static str, CommandError> {
        match self.coordinator.despawn(owner, DespawnReason::Command) {
            DespawnOutcome::Enqueued | DespawnOutcome::Detached => Ok("Dismissing your pet."),
            DespawnOutcome::Dropped | DespawnOutcome::Deferred => Err(CommandError::Busy),
            DespawnOutcome::NotActive => Err(CommandError::NoPet),
        }
    }

    /// `givefreepet`: reset and grant a trial item to a player in this world.
    ///
    /// # Errors
    /// [`CommandError::Grant`] if the player is elsewhere or full.
    pub fn give_free_pet(&self, store: &mut dyn EntityStore, target: OwnerId) -> Result<String, CommandError> {
        let serial = self.trial.grant(store, target)?;
        info!(owner = %target, serial = %serial, "Admin granted free pet");
        Ok(format!("Granted a free pet to {target}."))
    }

    /// `clearfreepets`: delete every trial record.
    ///
    /// # Errors
    /// [`CommandError::Store`] if the record directory cannot be listed.
    pub fn clear_free_pets(&self) -> Result<String, CommandError> {
        let count = self.trial.reset_all()?;
        info!(count, "Admin cleared free pet records");
        Ok(format!("Reset {count} free pet record(s)."))
    }

    /// `status`: snapshot of an owner's companion.
    #[must_use]
    pub fn status(&self, owner: OwnerId) -> StatusReport {
        let entry = self.coordinator.index().entry(&owner);
        let timers = self.trial.timers();
        let trial = timers
            .store()
            .load(&owner)
            .ok()
            .filter(|record| record.received)
            .map(|record| {
                let remaining_ms = timers.remaining_ms(&owner).unwrap_or(record.remaining_ms);
                TrialStatus {
                    received: record.received,
                    remaining_ms,
                    remaining: vispet_core::format_duration(remaining_ms),
                    running: timers.is_running(&owner),
                }
            });
        StatusReport {
            owner,
            active: entry.active,
            pending: entry.pending,
            world: entry.world.map(|w| w.0),
            companion: entry.companion,
            pet_type: entry.pet_type.map(|t| t.spawn_template),
            grace_ticks: entry.grace_ticks,
            trial,
        }
    }

    /// `status` rendered as pretty JSON.
    ///
    /// # Errors
    /// [`CommandError::Encode`] if serialization fails.
    pub fn status_json(&self, owner: OwnerId) -> Result<String, CommandError> {
        Ok(serde_json::to_string_pretty(&self.status(owner))?)
    }
}
