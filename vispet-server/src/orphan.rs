//! Per-tick reconciliation of companion entities against the ownership
//! index, plus upkeep of the companions that survive it.
//!
//! Companions carry only a plain ownership tag, so anything that breaks the
//! index (a restart, a dropped task, a world that unloaded mid-despawn)
//! leaves entities nobody tracks. The sweep removes them. It never touches
//! an owner with an operation in flight; that operation owns the entity.

use std::sync::Arc;

use tracing::{debug, info, warn};

use vispet_core::config::LifecycleConfig;
use vispet_core::ownership::OwnershipIndex;
use vispet_core::types::EntityRef;

use crate::components::ContainerKind;
use crate::host::EntityStore;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Companions inspected.
    pub inspected: usize,
    /// Orphans removed.
    pub removed: usize,
    /// Hotbar slot-0 stacks moved out of the way.
    pub restacked: usize,
    /// Companions teleported back to their owner.
    pub teleported: usize,
}

/// Removes companions nobody owns and keeps owned ones near their owner.
#[derive(Debug, Clone)]
pub struct OrphanReconciler {
    index: Arc<OwnershipIndex>,
    teleport_distance_sq: f64,
}

impl OrphanReconciler {
    /// Create a reconciler over an index.
    #[must_use]
    pub fn new(index: Arc<OwnershipIndex>, lifecycle: &LifecycleConfig) -> Self {
        Self {
            index,
            teleport_distance_sq: lifecycle.teleport_distance * lifecycle.teleport_distance,
        }
    }

    /// Sweep one world.
    pub fn sweep(&self, store: &mut dyn EntityStore) -> SweepReport {
        let mut report = SweepReport::default();
        let world = store.world().clone();
        for (entity, tag) in store.companions() {
            report.inspected += 1;
            let Some(tag) = tag else {
                self.remove_orphan(store, entity, "missing ownership tag");
                report.removed += 1;
                continue;
            };
            let owner = tag.owner;
            if self.index.is_pending(&owner) {
                continue;
            }
            if !self.index.is_active(&owner) {
                self.remove_orphan(store, entity, "owner not active");
                report.removed += 1;
                continue;
            }
            if !self.index.is_registered_companion(&owner, &world, entity) {
                self.remove_orphan(store, entity, "duplicate of registered companion");
                report.removed += 1;
                continue;
            }

            if restack_slot_zero(store, entity) {
                report.restacked += 1;
            }
            if let Some(owner_entity) = self.index.owner_entity(&owner) {
                if self.follow_owner(store, entity, owner_entity) {
                    report.teleported += 1;
                }
            }
        }
        if report.removed > 0 {
            info!(world = %world, removed = report.removed, "Removed orphaned companions");
        }
        report
    }

    fn remove_orphan(&self, store: &mut dyn EntityStore, entity: EntityRef, cause: &'static str) {
        if store.remove(entity) {
            debug!(world = %store.world(), companion = %entity, cause, "Orphaned companion removed");
        }
    }

    fn follow_owner(&self, store: &mut dyn EntityStore, entity: EntityRef, owner_entity: EntityRef) -> bool {
        let (Some(pet), Some(owner)) = (store.position(entity), store.position(owner_entity)) else {
            return false;
        };
        if pet.distance_squared(&owner) <= self.teleport_distance_sq {
            return false;
        }
        match store.set_position(entity, owner.offset(1.0, 0.0, 1.0)) {
            Ok(()) => true,
            Err(e) => {
                warn!(companion = %entity, error = %e, "Could not teleport companion to owner");
                false
            }
        }
    }
}

/// Slot 0 of a companion's hotbar is its held item. Move whatever landed
/// there into the first free slot.
fn restack_slot_zero(store: &mut dyn EntityStore, entity: EntityRef) -> bool {
    let Some(hotbar) = store.container_mut(entity, ContainerKind::Hotbar) else {
        return false;
    };
    let Some(stack) = hotbar.get(0).filter(|s| !s.is_empty()).cloned() else {
        return false;
    };
    let Some(free) = (1..hotbar.capacity()).find(|slot| hotbar.get(*slot).is_none_or(|s| s.is_empty())) else {
        return false;
    };
    hotbar.set(free, Some(stack));
    hotbar.set(0, None);
    true
}
