//! Trial grants: periodic expiry, login/logout handling, admin resets.
//!
//! Accounting lives in [`TrialTimers`]; this service decides what happens
//! to items and companions when the numbers say so.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use vispet_core::config::TrialConfig;
use vispet_core::error::VisPetError;
use vispet_core::trial::{format_duration, TrialTimers};
use vispet_core::types::{EntityRef, ItemStack, OwnerId, Serial};

use crate::components::ContainerKind;
use crate::coordinator::{DespawnReason, LifecycleCoordinator};
use crate::host::EntityStore;

/// Why a grant did not happen.
#[derive(Debug, Error)]
pub enum GrantError {
    /// Neither the hotbar nor storage has a free slot.
    #[error("no free inventory slot")]
    InventoryFull,
    /// The player entity is not in this world.
    #[error("player {0} is not in this world")]
    PlayerNotFound(OwnerId),
    /// The record could not be written.
    #[error(transparent)]
    Store(#[from] VisPetError),
}

/// What a reconnect did for the owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyOutcome {
    /// Nothing to do.
    Idle,
    /// Expired item removed.
    Expired,
    /// Time remains; owner was told how much.
    Remaining(i64),
    /// A fresh trial item was handed out.
    Granted(Serial),
    /// Granting was due but the inventory was full.
    GrantDeferred,
}

/// Drives trial expiry and grants.
#[derive(Debug)]
pub struct TrialTimerService {
    coordinator: LifecycleCoordinator,
    timers: Arc<TrialTimers>,
    config: TrialConfig,
}

impl TrialTimerService {
    /// Create the service.
    #[must_use]
    pub fn new(coordinator: LifecycleCoordinator, config: TrialConfig) -> Self {
        let timers = Arc::clone(coordinator.timers());
        Self {
            coordinator,
            timers,
            config,
        }
    }

    /// The accountant.
    #[must_use]
    pub fn timers(&self) -> &Arc<TrialTimers> {
        &self.timers
    }

    /// Trial settings.
    #[must_use]
    pub fn config(&self) -> &TrialConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Periodic tick
    // ------------------------------------------------------------------

    /// Expire every summoned trial whose budget ran out. Returns the owners
    /// that expired.
    pub fn tick(&self) -> Vec<OwnerId> {
        let expired = self.timers.poll_expired();
        for owner in &expired {
            self.expire(*owner);
        }
        expired
    }

    fn expire(&self, owner: OwnerId) {
        let serial = match self.timers.store().load(&owner) {
            Ok(record) => record.serial,
            Err(e) => {
                warn!(owner = %owner, error = %e, "Could not read trial record on expiry");
                None
            }
        };

        let world = self
            .coordinator
            .player_world(&owner)
            .or_else(|| self.coordinator.index().world_of(&owner));
        let handle = world.and_then(|w| self.coordinator.worlds().get(&w));
        if let Some(handle) = handle {
            let item_id = self.config.item_id.clone();
            let index = Arc::clone(self.coordinator.index());
            let result = handle.execute("trial_expire", move |store| {
                let mut removed = 0;
                if let Some(player) = store.player(&owner) {
                    removed += remove_trial_items(store, player, &item_id, serial.as_ref());
                }
                if let Some(pet) = index.companion(&owner).filter(|e| store.contains(*e)) {
                    removed += remove_trial_items_in(store, pet, ContainerKind::Hotbar, &item_id, serial.as_ref());
                }
                debug!(owner = %owner, removed, "Expired trial items removed");
                Ok(())
            });
            if let Err(e) = result {
                warn!(owner = %owner, error = %e, "Could not enqueue trial item removal");
            }
        }

        let outcome = self.coordinator.despawn(owner, DespawnReason::TrialExpired);
        self.coordinator
            .notifier()
            .notify(&owner, "Your free pet has expired!");
        info!(owner = %owner, outcome = ?outcome, "Trial expired");
    }

    // ------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------

    /// Handle an owner becoming ready in a world. Runs on that world's
    /// thread.
    pub fn on_ready(&self, store: &mut dyn EntityStore, owner: OwnerId, player: EntityRef) -> ReadyOutcome {
        let record = match self.timers.store().load(&owner) {
            Ok(record) => record,
            Err(e) => {
                warn!(owner = %owner, error = %e, "Could not read trial record on login, skipping");
                return ReadyOutcome::Idle;
            }
        };
        let item_id = self.config.item_id.as_str();

        if record.is_expired() {
            let serial = record.serial.as_ref();
            let holds = holds_trial_item(store, player, item_id, serial);
            if holds {
                remove_trial_items(store, player, item_id, serial);
                self.coordinator
                    .notifier()
                    .notify(&owner, "Your free pet has expired!");
                info!(owner = %owner, "Removed expired trial item on login");
                return ReadyOutcome::Expired;
            }
            return ReadyOutcome::Idle;
        }

        if record.received {
            if holds_trial_item(store, player, item_id, None) {
                let remaining = self.timers.remaining_ms(&owner).unwrap_or(record.remaining_ms);
                self.coordinator.notifier().notify(
                    &owner,
                    &format!("Free pet time left: {}", format_duration(remaining)),
                );
                return ReadyOutcome::Remaining(remaining);
            }
            return ReadyOutcome::Idle;
        }

        if !self.config.grant_on_first_login {
            return ReadyOutcome::Idle;
        }
        match self.grant_into(store, owner, player) {
            Ok(serial) => ReadyOutcome::Granted(serial),
            Err(GrantError::InventoryFull) => {
                info!(owner = %owner, "Inventory full, trial grant retried next login");
                ReadyOutcome::GrantDeferred
            }
            Err(e) => {
                warn!(owner = %owner, error = %e, "Trial grant failed");
                ReadyOutcome::Idle
            }
        }
    }

    /// Settle accounting for a leaving owner whose companion is already
    /// gone.
    pub fn on_disconnect(&self, owner: &OwnerId) {
        if let Some(remaining) = self.timers.stop(owner) {
            debug!(owner = %owner, remaining_ms = remaining, "Trial settled on disconnect");
        }
    }

    // ------------------------------------------------------------------
    // Grants and resets
    // ------------------------------------------------------------------

    fn grant_into(&self, store: &mut dyn EntityStore, owner: OwnerId, player: EntityRef) -> Result<Serial, GrantError> {
        let (kind, slot) = ContainerKind::ALL
            .iter()
            .find_map(|kind| {
                let slot = store.container(player, *kind)?.first_empty()?;
                Some((*kind, slot))
            })
            .ok_or(GrantError::InventoryFull)?;
        let serial = self.timers.grant(&owner)?;
        let container = store
            .container_mut(player, kind)
            .ok_or(GrantError::PlayerNotFound(owner))?;
        container.set(slot, Some(ItemStack::new(self.config.item_id.clone(), 1).with_serial(serial.clone())));
        let message = self
            .config
            .grant_message
            .replace("{time}", &format_duration(self.timers.duration_ms()));
        self.coordinator.notifier().notify(&owner, &message);
        info!(owner = %owner, serial = %serial, "Trial item granted");
        Ok(serial)
    }

    /// Reset an owner's record and hand out a fresh trial item.
    ///
    /// # Errors
    /// [`GrantError`] if the player is elsewhere, full, or the record
    /// cannot be written.
    pub fn grant(&self, store: &mut dyn EntityStore, owner: OwnerId) -> Result<Serial, GrantError> {
        let player = store.player(&owner).ok_or(GrantError::PlayerNotFound(owner))?;
        self.timers.reset(&owner)?;
        self.grant_into(store, owner, player)
    }

    /// Forget an owner's trial.
    ///
    /// # Errors
    /// Returns an I/O error if the record cannot be deleted.
    pub fn reset(&self, owner: &OwnerId) -> vispet_core::Result<bool> {
        self.timers.reset(owner)
    }

    /// Forget every trial. Returns how many records were removed.
    ///
    /// # Errors
    /// Returns an I/O error if the record directory cannot be listed.
    pub fn reset_all(&self) -> vispet_core::Result<usize> {
        self.timers.reset_all()
    }

    /// Remaining time, formatted, for a granted owner.
    #[must_use]
    pub fn remaining_text(&self, owner: &OwnerId) -> Option<String> {
        let record = self.timers.store().load(owner).ok()?;
        if !record.received {
            return None;
        }
        let remaining = self.timers.remaining_ms(owner).ok()?;
        Some(format_duration(remaining))
    }
}

/// Tick the service on a fixed period until the task is aborted.
pub fn spawn_trial_ticker(service: Arc<TrialTimerService>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(period_ms = period.as_millis(), "Trial ticker started");
        loop {
            interval.tick().await;
            service.tick();
        }
    })
}

// ---------------------------------------------------------------------------
// Item helpers
// ---------------------------------------------------------------------------

fn is_trial_copy(stack: &ItemStack, item_id: &str, serial: Option<&Serial>) -> bool {
    stack.item_id == item_id && serial.is_none_or(|s| stack.serial.as_ref() == Some(s))
}

fn holds_trial_item(store: &dyn EntityStore, player: EntityRef, item_id: &str, serial: Option<&Serial>) -> bool {
    ContainerKind::ALL.iter().any(|kind| {
        store
            .container(player, *kind)
            .and_then(|c| c.find(&|s: &ItemStack| is_trial_copy(s, item_id, serial)))
            .is_some()
    })
}

/// Remove the copy carrying `serial` from the player's containers, or every
/// trial item when there is no serial on record.
fn remove_trial_items(store: &mut dyn EntityStore, player: EntityRef, item_id: &str, serial: Option<&Serial>) -> usize {
    ContainerKind::ALL
        .iter()
        .map(|kind| remove_trial_items_in(store, player, *kind, item_id, serial))
        .sum()
}

fn remove_trial_items_in(
    store: &mut dyn EntityStore,
    entity: EntityRef,
    kind: ContainerKind,
    item_id: &str,
    serial: Option<&Serial>,
) -> usize {
    store
        .container_mut(entity, kind)
        .map_or(0, |c| c.remove_matching(&|s: &ItemStack| is_trial_copy(s, item_id, serial)))
}
