//! The in-memory ownership index.
//!
//! Maps each owner to their live companion and bookkeeping around it. All
//! maps are concurrent and may be read from any thread without locking.
//! Writes for one owner are serialized by the pending set: only the holder
//! of an owner's [`PendingGuard`] mutates that owner's entries, and the
//! guard is released when the in-flight operation finishes, fails, or its
//! task is dropped unrun.
//!
//! The companion entity never points back at its owner beyond a plain
//! ownership tag; the index is the only place the relation lives. It is not
//! durable: after a restart every tagged companion is an orphan until the
//! reconciler removes it.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};

use crate::descriptor::PetTypeDescriptor;
use crate::types::{EntityRef, OwnerId, WorldId};

/// Everything recorded when a spawn commits.
#[derive(Debug, Clone)]
pub struct Registration {
    /// World the companion lives in.
    pub world: WorldId,
    /// The companion entity.
    pub companion: EntityRef,
    /// The owner's player entity.
    pub owner_entity: EntityRef,
    /// Variant in effect.
    pub pet_type: &'static PetTypeDescriptor,
}

/// Snapshot of one owner's entries.
#[derive(Debug, Clone)]
pub struct OwnerEntry {
    /// Companion entity, absent mid-migration.
    pub companion: Option<EntityRef>,
    /// Owner's player entity.
    pub owner_entity: Option<EntityRef>,
    /// World the companion was last spawned in.
    pub world: Option<WorldId>,
    /// Variant in effect.
    pub pet_type: Option<&'static PetTypeDescriptor>,
    /// In the active set.
    pub active: bool,
    /// Operation in flight.
    pub pending: bool,
    /// Remaining grace ticks, if any.
    pub grace_ticks: Option<u32>,
}

/// Concurrent owner → companion index.
#[derive(Debug, Default)]
pub struct OwnershipIndex {
    companions: DashMap<OwnerId, EntityRef>,
    owner_entities: DashMap<OwnerId, EntityRef>,
    active: DashSet<OwnerId>,
    worlds: DashMap<OwnerId, WorldId>,
    pet_types: DashMap<OwnerId, &'static PetTypeDescriptor>,
    pending: DashSet<OwnerId>,
    grace: DashMap<OwnerId, u32>,
}

impl OwnershipIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Pending set
    // ------------------------------------------------------------------

    /// Mark the owner pending. Returns `None` if an operation is already in
    /// flight for them.
    pub fn try_begin(self: &Arc<Self>, owner: OwnerId) -> Option<PendingGuard> {
        if self.pending.insert(owner) {
            Some(PendingGuard {
                index: Arc::clone(self),
                owner,
            })
        } else {
            None
        }
    }

    /// Whether an operation is in flight for the owner.
    #[must_use]
    pub fn is_pending(&self, owner: &OwnerId) -> bool {
        self.pending.contains(owner)
    }

    /// Number of owners with an operation in flight.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    // ------------------------------------------------------------------
    // Commit / clear
    // ------------------------------------------------------------------

    /// Record a committed spawn.
    pub fn register(&self, owner: OwnerId, registration: Registration) {
        self.companions.insert(owner, registration.companion);
        self.owner_entities.insert(owner, registration.owner_entity);
        self.worlds.insert(owner, registration.world);
        self.pet_types.insert(owner, registration.pet_type);
        self.active.insert(owner);
    }

    /// Remove every entry for the owner. Returns the companion entity and
    /// world that were registered, if any.
    pub fn clear(&self, owner: &OwnerId) -> Option<(WorldId, EntityRef)> {
        self.active.remove(owner);
        self.owner_entities.remove(owner);
        self.pet_types.remove(owner);
        self.grace.remove(owner);
        let companion = self.companions.remove(owner).map(|(_, e)| e);
        let world = self.worlds.remove(owner).map(|(_, w)| w);
        world.zip(companion)
    }

    /// Drop only the companion-entity half, keeping the owner active. Used
    /// while a migration has removed the old entity and not yet created the
    /// new one.
    pub fn detach_companion(&self, owner: &OwnerId) -> Option<EntityRef> {
        self.companions.remove(owner).map(|(_, e)| e)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Whether the owner has an active companion.
    #[must_use]
    pub fn is_active(&self, owner: &OwnerId) -> bool {
        self.active.contains(owner)
    }

    /// The owner's companion entity.
    #[must_use]
    pub fn companion(&self, owner: &OwnerId) -> Option<EntityRef> {
        self.companions.get(owner).map(|e| *e)
    }

    /// The owner's player entity.
    #[must_use]
    pub fn owner_entity(&self, owner: &OwnerId) -> Option<EntityRef> {
        self.owner_entities.get(owner).map(|e| *e)
    }

    /// World the owner's companion lives in.
    #[must_use]
    pub fn world_of(&self, owner: &OwnerId) -> Option<WorldId> {
        self.worlds.get(owner).map(|w| w.clone())
    }

    /// Variant in effect for the owner.
    #[must_use]
    pub fn pet_type(&self, owner: &OwnerId) -> Option<&'static PetTypeDescriptor> {
        self.pet_types.get(owner).map(|t| *t)
    }

    /// Whether `entity` in `world` is the owner's registered companion.
    #[must_use]
    pub fn is_registered_companion(&self, owner: &OwnerId, world: &WorldId, entity: EntityRef) -> bool {
        self.companion(owner) == Some(entity) && self.world_of(owner).as_ref() == Some(world)
    }

    /// Snapshot of the active set.
    #[must_use]
    pub fn active_owners(&self) -> Vec<OwnerId> {
        self.active.iter().map(|o| *o).collect()
    }

    /// Size of the active set.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Everything known about one owner.
    #[must_use]
    pub fn entry(&self, owner: &OwnerId) -> OwnerEntry {
        OwnerEntry {
            companion: self.companion(owner),
            owner_entity: self.owner_entity(owner),
            world: self.world_of(owner),
            pet_type: self.pet_type(owner),
            active: self.is_active(owner),
            pending: self.is_pending(owner),
            grace_ticks: self.grace.get(owner).map(|g| *g),
        }
    }

    // ------------------------------------------------------------------
    // World-change grace
    // ------------------------------------------------------------------

    /// Start (or restart) the grace window.
    pub fn set_grace(&self, owner: OwnerId, ticks: u32) {
        if ticks > 0 {
            self.grace.insert(owner, ticks);
        }
    }

    /// Consume one grace tick. Returns `true` if the owner was inside the
    /// window on this tick.
    pub fn tick_grace(&self, owner: &OwnerId) -> bool {
        let Some(mut remaining) = self.grace.get_mut(owner) else {
            return false;
        };
        if *remaining <= 1 {
            drop(remaining);
            self.grace.remove(owner);
        } else {
            *remaining -= 1;
        }
        true
    }

    /// Remaining grace ticks.
    #[must_use]
    pub fn grace_remaining(&self, owner: &OwnerId) -> Option<u32> {
        self.grace.get(owner).map(|g| *g)
    }
}

/// Proof that the holder owns the owner's single in-flight operation.
///
/// Dropping the guard clears the pending marker, whatever path the
/// operation took.
#[must_use = "dropping the guard immediately clears the pending marker"]
#[derive(Debug)]
pub struct PendingGuard {
    index: Arc<OwnershipIndex>,
    owner: OwnerId,
}

impl PendingGuard {
    /// The owner this guard is held for.
    #[must_use]
    pub fn owner(&self) -> OwnerId {
        self.owner
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.index.pending.remove(&self.owner);
    }
}
