//! The spawn/despawn protocol.
//!
//! Every path that creates or destroys a companion goes through
//! [`LifecycleCoordinator`]. Both operations follow the same shape:
//!
//! 1. Check preconditions and take the owner's pending marker synchronously
//!    on the calling thread.
//! 2. Enqueue a task on the world that owns the companion.
//! 3. Inside the task, mutate the entity store, update the ownership index,
//!    then release the marker by dropping the guard.
//!
//! The guard travels inside the task, so a task that is dropped unrun also
//! releases the owner.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use vispet_core::config::{LifecycleConfig, TrialConfig};
use vispet_core::descriptor::{EffectRegistry, PetTypeDescriptor, PET_TYPES};
use vispet_core::error::{Result, VisPetError};
use vispet_core::ownership::{OwnershipIndex, PendingGuard, Registration};
use vispet_core::persistence::InventoryStore;
use vispet_core::trial::{format_duration, SerialReconcile, TrialTimers};
use vispet_core::types::{EntityRef, ItemStack, OwnerId, Position, WorldId};

use crate::components::{CompanionTag, ContainerKind, SpawnSpec};
use crate::host::{EntityStore, Notifier};
use crate::world::WorldRegistry;

// ---------------------------------------------------------------------------
// Requests and outcomes
// ---------------------------------------------------------------------------

/// Everything needed to summon a companion.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// Owning player.
    pub owner: OwnerId,
    /// The owner's player entity in `world`.
    pub owner_entity: EntityRef,
    /// World to spawn in.
    pub world: WorldId,
    /// Spawn position.
    pub position: Position,
    /// Variant to spawn.
    pub pet_type: &'static PetTypeDescriptor,
}

/// Why a spawn was refused before anything was enqueued.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpawnRejected {
    /// The owner already has a companion.
    #[error("owner {0} already has an active companion")]
    AlreadyActive(OwnerId),
    /// Another spawn or despawn is in flight.
    #[error("owner {0} has an operation in flight")]
    AlreadyPending(OwnerId),
    /// Target world has no queue.
    #[error("world {0} is not registered")]
    WorldNotRegistered(WorldId),
    /// Target world's queue is shut down.
    #[error("world {0} is closed")]
    WorldClosed(WorldId),
}

/// What triggered a despawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DespawnReason {
    /// The owner used their summon item again.
    Toggle,
    /// The `petclose` command.
    Command,
    /// The owner no longer holds any summon item.
    ItemLost,
    /// The owner left the server.
    Disconnect,
    /// The trial budget ran out.
    TrialExpired,
}

impl DespawnReason {
    /// System-triggered despawns wait out a pending operation instead of
    /// being dropped.
    #[must_use]
    pub fn is_deferrable(self) -> bool {
        matches!(self, Self::Disconnect | Self::TrialExpired)
    }

    /// Whether the owner asked for this despawn.
    #[must_use]
    pub fn is_user(self) -> bool {
        matches!(self, Self::Toggle | Self::Command)
    }
}

impl std::fmt::Display for DespawnReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Toggle => "toggle",
            Self::Command => "command",
            Self::ItemLost => "item_lost",
            Self::Disconnect => "disconnect",
            Self::TrialExpired => "trial_expired",
        };
        f.write_str(s)
    }
}

/// Result of a despawn request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DespawnOutcome {
    /// A despawn task is on the companion's world queue.
    Enqueued,
    /// Another operation is in flight; this request will run once it ends.
    Deferred,
    /// Another operation is in flight; this request was discarded.
    Dropped,
    /// The owner has no companion.
    NotActive,
    /// The companion's world is gone; the owner's state was cleared without
    /// touching any entity.
    Detached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SpawnMode {
    Fresh,
    Migrated,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Cloneable handle to the spawn/despawn protocol.
#[derive(Clone)]
pub struct LifecycleCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    lifecycle: LifecycleConfig,
    trial_item: String,
    index: Arc<OwnershipIndex>,
    worlds: Arc<WorldRegistry>,
    inventories: InventoryStore,
    timers: Arc<TrialTimers>,
    effects: Arc<dyn EffectRegistry>,
    notifier: Arc<dyn Notifier>,
    deferred: DashMap<OwnerId, DespawnReason>,
    player_worlds: DashMap<OwnerId, WorldId>,
}

impl std::fmt::Debug for LifecycleCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleCoordinator")
            .field("active", &self.inner.index.active_count())
            .field("pending", &self.inner.index.pending_count())
            .field("deferred", &self.inner.deferred.len())
            .finish_non_exhaustive()
    }
}

impl LifecycleCoordinator {
    /// Assemble the coordinator.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lifecycle: LifecycleConfig,
        trial: &TrialConfig,
        index: Arc<OwnershipIndex>,
        worlds: Arc<WorldRegistry>,
        inventories: InventoryStore,
        timers: Arc<TrialTimers>,
        effects: Arc<dyn EffectRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                lifecycle,
                trial_item: trial.item_id.clone(),
                index,
                worlds,
                inventories,
                timers,
                effects,
                notifier,
                deferred: DashMap::new(),
                player_worlds: DashMap::new(),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// The ownership index.
    #[must_use]
    pub fn index(&self) -> &Arc<OwnershipIndex> {
        &self.inner.index
    }

    /// The world registry.
    #[must_use]
    pub fn worlds(&self) -> &Arc<WorldRegistry> {
        &self.inner.worlds
    }

    /// The trial accountant.
    #[must_use]
    pub fn timers(&self) -> &Arc<TrialTimers> {
        &self.inner.timers
    }

    /// The effect registry.
    #[must_use]
    pub fn effects(&self) -> &dyn EffectRegistry {
        &*self.inner.effects
    }

    /// The notifier.
    #[must_use]
    pub fn notifier(&self) -> &dyn Notifier {
        &*self.inner.notifier
    }

    /// Lifecycle tuning.
    #[must_use]
    pub fn lifecycle(&self) -> &LifecycleConfig {
        &self.inner.lifecycle
    }

    /// Trial item ID.
    #[must_use]
    pub fn trial_item(&self) -> &str {
        &self.inner.trial_item
    }

    /// Whether the owner has a companion.
    #[must_use]
    pub fn is_active(&self, owner: &OwnerId) -> bool {
        self.inner.index.is_active(owner)
    }

    /// Record the world an owner was last seen in.
    pub fn note_player_world(&self, owner: OwnerId, world: &WorldId) {
        let stale = self.inner.player_worlds.get(&owner).is_none_or(|w| *w != *world);
        if stale {
            self.inner.player_worlds.insert(owner, world.clone());
        }
    }

    /// World an owner was last seen in.
    #[must_use]
    pub fn player_world(&self, owner: &OwnerId) -> Option<WorldId> {
        self.inner.player_worlds.get(owner).map(|w| w.clone())
    }

    /// Forget where an owner is (disconnect).
    pub fn forget_player(&self, owner: &OwnerId) {
        self.inner.player_worlds.remove(owner);
    }

    /// Number of despawns waiting for a pending operation to finish.
    #[must_use]
    pub fn deferred_count(&self) -> usize {
        self.inner.deferred.len()
    }

    // ------------------------------------------------------------------
    // Spawn
    // ------------------------------------------------------------------

    /// Summon a companion for an owner.
    ///
    /// # Errors
    /// Returns [`SpawnRejected`] if the owner is active or pending, or the
    /// target world cannot take tasks. Failures after the handoff are
    /// logged by the world and leave the owner inactive.
    pub fn spawn(&self, request: SpawnRequest) -> std::result::Result<(), SpawnRejected> {
        let owner = request.owner;
        if self.inner.index.is_active(&owner) {
            return Err(SpawnRejected::AlreadyActive(owner));
        }
        let guard = self
            .inner
            .index
            .try_begin(owner)
            .ok_or(SpawnRejected::AlreadyPending(owner))?;
        // A spawn may have committed between the check above and the guard.
        if self.inner.index.is_active(&owner) {
            return Err(SpawnRejected::AlreadyActive(owner));
        }
        let Some(handle) = self.inner.worlds.get(&request.world) else {
            return Err(SpawnRejected::WorldNotRegistered(request.world));
        };
        let world = request.world.clone();
        let this = self.clone();
        handle
            .execute("spawn", move |store| this.run_spawn(store, &request, SpawnMode::Fresh, guard))
            .map_err(|_| SpawnRejected::WorldClosed(world.clone()))?;
        debug!(owner = %owner, world = %world, "Spawn enqueued");
        Ok(())
    }

    /// Enqueue a spawn for an owner whose marker is already held (second
    /// phase of a migration). On failure to enqueue the owner is abandoned.
    pub(crate) fn spawn_held(&self, request: SpawnRequest, mode: SpawnMode, guard: PendingGuard) {
        let owner = request.owner;
        let world = request.world.clone();
        let Some(handle) = self.inner.worlds.get(&world).filter(|h| !h.is_closed()) else {
            warn!(owner = %owner, world = %world, "Target world unavailable, abandoning companion");
            self.abandon(&owner);
            drop(guard);
            return;
        };
        let this = self.clone();
        if let Err(e) = handle.execute("spawn", move |store| this.run_spawn(store, &request, mode, guard)) {
            warn!(owner = %owner, world = %world, error = %e, "Could not enqueue spawn, abandoning companion");
            self.abandon(&owner);
        }
    }

    fn run_spawn(
        &self,
        store: &mut dyn EntityStore,
        request: &SpawnRequest,
        mode: SpawnMode,
        guard: PendingGuard,
    ) -> Result<()> {
        let result = self.spawn_in_world(store, request, mode);
        if let Err(e) = &result {
            self.spawn_failed(store, request, mode, e);
        }
        drop(guard);
        result
    }

    fn spawn_in_world(&self, store: &mut dyn EntityStore, request: &SpawnRequest, mode: SpawnMode) -> Result<()> {
        let owner = request.owner;
        let pet_type = request.pet_type;
        let effects = pet_type
            .effects(&*self.inner.effects)
            .ok_or_else(|| VisPetError::EffectNotResolved(pet_type.active_effect_id.to_string()))?;
        if !store.contains(request.owner_entity) {
            return Err(VisPetError::EntityNotFound(request.owner_entity));
        }

        let entity = store.spawn(&SpawnSpec::for_descriptor(pet_type, request.position))?;
        if let Err(e) = self.attach(store, entity, request) {
            store.remove(entity);
            return Err(e);
        }

        self.inner.index.register(
            owner,
            Registration {
                world: store.world().clone(),
                companion: entity,
                owner_entity: request.owner_entity,
                pet_type,
            },
        );
        if let Err(e) = store.add_effect(
            request.owner_entity,
            effects.active,
            self.inner.lifecycle.active_effect_duration_secs,
        ) {
            warn!(owner = %owner, error = %e, "Could not apply active marker");
        }

        let trial_remaining = self.trial_spawn_hook(store, owner, request.owner_entity);

        let message = match (mode, trial_remaining) {
            (SpawnMode::Migrated, _) => "Pet followed you to the new world!".to_string(),
            (SpawnMode::Fresh, Some(ms)) => format!("Pet summoned! Free pet time left: {}", format_duration(ms)),
            (SpawnMode::Fresh, None) => "Pet summoned!".to_string(),
        };
        self.inner.notifier.notify(&owner, &message);
        info!(
            owner = %owner,
            world = %store.world(),
            companion = %entity,
            template = pet_type.spawn_template,
            migrated = mode == SpawnMode::Migrated,
            "Companion spawned"
        );
        Ok(())
    }

    fn attach(&self, store: &mut dyn EntityStore, entity: EntityRef, request: &SpawnRequest) -> Result<()> {
        let capacity = self.inner.lifecycle.companion_inventory_capacity;
        store.set_inventory_capacity(entity, capacity)?;
        store.set_companion_tag(entity, CompanionTag { owner: request.owner })?;

        let records = match self.inner.inventories.load(&request.owner, capacity) {
            Ok(records) => records,
            Err(e) => {
                warn!(owner = %request.owner, error = %e, "Could not load companion inventory, starting empty");
                Vec::new()
            }
        };
        let hotbar = store
            .container_mut(entity, ContainerKind::Hotbar)
            .ok_or(VisPetError::EntityNotFound(entity))?;
        for record in &records {
            hotbar.set(record.slot, Some(record.to_stack()));
        }
        Ok(())
    }

    fn spawn_failed(&self, store: &mut dyn EntityStore, request: &SpawnRequest, mode: SpawnMode, error: &VisPetError) {
        let owner = request.owner;
        warn!(owner = %owner, world = %store.world(), error = %error, "Companion spawn failed");
        match mode {
            SpawnMode::Fresh => {
                self.inner.notifier.notify(&owner, "Could not summon your pet.");
            }
            SpawnMode::Migrated => {
                if let Some(effects) = request.pet_type.cached_effects() {
                    store.remove_effect(request.owner_entity, effects.active);
                }
                self.abandon(&owner);
            }
        }
    }

    /// Drop every trace of an owner's companion without touching entities
    /// and settle their trial accounting.
    pub(crate) fn abandon(&self, owner: &OwnerId) {
        self.inner.index.clear(owner);
        self.inner.timers.stop(owner);
        info!(owner = %owner, "Companion state abandoned");
    }

    /// Trial bookkeeping on spawn. Returns the remaining budget if the
    /// owner is running on a trial.
    fn trial_spawn_hook(&self, store: &mut dyn EntityStore, owner: OwnerId, player: EntityRef) -> Option<i64> {
        let trial_item = self.inner.trial_item.as_str();
        let (kind, slot, serial) = ContainerKind::ALL.iter().find_map(|kind| {
            let container = store.container(player, *kind)?;
            let slot = container.find(&|s: &ItemStack| s.item_id == trial_item)?;
            let serial = container.get(slot).and_then(|s| s.serial.clone());
            Some((*kind, slot, serial))
        })?;

        match self.inner.timers.reconcile_serial(&owner, serial.as_ref()) {
            Ok(SerialReconcile::Stamp(serial)) => {
                if let Some(container) = store.container_mut(player, kind) {
                    if let Some(stack) = container.get(slot).cloned() {
                        container.set(slot, Some(stack.with_serial(serial)));
                    }
                }
            }
            Ok(SerialReconcile::Adopted(_) | SerialReconcile::Unchanged) => {}
            Err(e) => {
                warn!(owner = %owner, error = %e, "Could not reconcile trial serial");
                return None;
            }
        }
        self.inner.timers.start(owner);
        self.inner.timers.remaining_ms(&owner).ok()
    }

    // ------------------------------------------------------------------
    // Despawn
    // ------------------------------------------------------------------

    /// Dismiss an owner's companion.
    pub fn despawn(&self, owner: OwnerId, reason: DespawnReason) -> DespawnOutcome {
        if self.inner.index.is_pending(&owner) {
            return self.hold_back(owner, reason);
        }
        if !self.inner.index.is_active(&owner) {
            return DespawnOutcome::NotActive;
        }
        let Some(guard) = self.inner.index.try_begin(owner) else {
            return self.hold_back(owner, reason);
        };
        if !self.inner.index.is_active(&owner) {
            return DespawnOutcome::NotActive;
        }
        self.inner.deferred.remove(&owner);

        let handle = self
            .inner
            .index
            .world_of(&owner)
            .and_then(|world| self.inner.worlds.get(&world));
        let Some(handle) = handle else {
            warn!(owner = %owner, reason = %reason, "Companion world is gone, clearing owner");
            self.strip_marker_remote(owner, self.inner.index.pet_type(&owner));
            self.abandon(&owner);
            drop(guard);
            return DespawnOutcome::Detached;
        };

        let world = handle.id().clone();
        let this = self.clone();
        let enqueued = handle.execute("despawn", move |store| {
            this.despawn_in_world(store, owner, reason);
            drop(guard);
            Ok(())
        });
        if let Err(e) = enqueued {
            warn!(owner = %owner, world = %world, error = %e, "Could not enqueue despawn, clearing owner");
            self.abandon(&owner);
            return DespawnOutcome::Detached;
        }
        debug!(owner = %owner, world = %world, reason = %reason, "Despawn enqueued");
        DespawnOutcome::Enqueued
    }

    fn hold_back(&self, owner: OwnerId, reason: DespawnReason) -> DespawnOutcome {
        if reason.is_deferrable() {
            self.inner.deferred.insert(owner, reason);
            debug!(owner = %owner, reason = %reason, "Despawn deferred until pending operation ends");
            DespawnOutcome::Deferred
        } else {
            DespawnOutcome::Dropped
        }
    }

    fn despawn_in_world(&self, store: &mut dyn EntityStore, owner: OwnerId, reason: DespawnReason) {
        let index = &self.inner.index;
        if let Some(entity) = index.companion(&owner) {
            self.save_inventory(store, owner, entity);
            store.remove(entity);
        }

        let pet_type = index.pet_type(&owner);
        let owner_entity = index.owner_entity(&owner);
        match (owner_entity, pet_type.and_then(PetTypeDescriptor::cached_effects)) {
            (Some(player), Some(effects)) if store.contains(player) => {
                store.remove_effect(player, effects.active);
            }
            _ => self.strip_marker_remote(owner, pet_type),
        }

        index.clear(&owner);
        self.inner.timers.stop(&owner);
        if reason.is_user() {
            self.inner.notifier.notify(&owner, "Pet dismissed.");
        }
        info!(owner = %owner, world = %store.world(), reason = %reason, "Companion despawned");
    }

    /// Persist a companion's hotbar. Failures are logged.
    pub(crate) fn save_inventory(&self, store: &dyn EntityStore, owner: OwnerId, entity: EntityRef) {
        let Some(hotbar) = store.container(entity, ContainerKind::Hotbar) else {
            warn!(owner = %owner, companion = %entity, "Companion has no inventory to save");
            return;
        };
        if let Err(e) = self.inner.inventories.save(&owner, &hotbar.snapshot()) {
            warn!(owner = %owner, error = %e, "Could not save companion inventory");
        }
    }

    /// Remove the active marker from the owner on whatever world they are in.
    pub(crate) fn strip_marker_remote(&self, owner: OwnerId, pet_type: Option<&'static PetTypeDescriptor>) {
        let Some(world) = self.player_world(&owner) else {
            return;
        };
        let Some(handle) = self.inner.worlds.get(&world) else {
            return;
        };
        let result = handle.execute("strip_marker", move |store| {
            let Some(player) = store.player(&owner) else {
                return Ok(());
            };
            let candidates: Vec<_> = match pet_type {
                Some(t) => vec![t],
                None => PET_TYPES.iter().collect(),
            };
            for t in candidates {
                if let Some(effects) = t.cached_effects() {
                    store.remove_effect(player, effects.active);
                }
            }
            Ok(())
        });
        if let Err(e) = result {
            debug!(owner = %owner, error = %e, "Owner world closed, marker left in place");
        }
    }

    /// Run despawns that were waiting for a pending operation to finish.
    /// Returns how many were retried.
    pub fn flush_deferred(&self) -> usize {
        let ready: Vec<(OwnerId, DespawnReason)> = self
            .inner
            .deferred
            .iter()
            .filter(|e| !self.inner.index.is_pending(e.key()))
            .map(|e| (*e.key(), *e.value()))
            .collect();
        for (owner, reason) in &ready {
            self.inner.deferred.remove(owner);
            let outcome = self.despawn(*owner, *reason);
            debug!(owner = %owner, reason = %reason, outcome = ?outcome, "Deferred despawn retried");
        }
        ready.len()
    }
}
