//! The contract this crate needs from the host engine.
//!
//! A host provides one [`EntityStore`] per world. Stores are only ever
//! touched from their world's owning thread: detection reads them inline
//! during the world tick, and every mutation issued from elsewhere arrives
//! as a task on the world's queue (see [`crate::world`]).

use vispet_core::error::Result;
use vispet_core::types::{EffectIndex, EntityRef, InventoryRecord, ItemStack, OwnerId, Position, WorldId};

pub use vispet_core::descriptor::EffectRegistry;

use crate::components::{CompanionTag, ContainerKind, SpawnSpec};

// ---------------------------------------------------------------------------
// Item containers
// ---------------------------------------------------------------------------

/// A fixed-size slotted item container.
pub trait ItemContainer {
    /// Number of slots.
    fn capacity(&self) -> u16;

    /// Stack in a slot. Empty slots read as `None`.
    fn get(&self, slot: u16) -> Option<&ItemStack>;

    /// Replace a slot's contents. Writes outside the capacity are ignored.
    fn set(&mut self, slot: u16, stack: Option<ItemStack>);

    /// First slot with nothing in it.
    fn first_empty(&self) -> Option<u16> {
        (0..self.capacity()).find(|slot| self.get(*slot).is_none_or(ItemStack::is_empty))
    }

    /// First slot whose stack satisfies `pred`.
    fn find(&self, pred: &dyn Fn(&ItemStack) -> bool) -> Option<u16> {
        (0..self.capacity()).find(|slot| self.get(*slot).is_some_and(|s| !s.is_empty() && pred(s)))
    }

    /// Occupied slots as persistable records.
    fn snapshot(&self) -> Vec<InventoryRecord> {
        (0..self.capacity())
            .filter_map(|slot| {
                self.get(slot)
                    .filter(|s| !s.is_empty())
                    .map(|s| InventoryRecord::new(slot, s.item_id.clone(), s.quantity))
            })
            .collect()
    }

    /// Empty every slot whose stack satisfies `pred`. Returns how many.
    fn remove_matching(&mut self, pred: &dyn Fn(&ItemStack) -> bool) -> usize {
        let mut removed = 0;
        for slot in 0..self.capacity() {
            if self.get(slot).is_some_and(|s| pred(s)) {
                self.set(slot, None);
                removed += 1;
            }
        }
        removed
    }
}

// ---------------------------------------------------------------------------
// Entity store
// ---------------------------------------------------------------------------

/// One world's entities, as seen from its owning thread.
pub trait EntityStore: Send {
    /// The world this store belongs to.
    fn world(&self) -> &WorldId;

    /// Players currently in this world.
    fn players(&self) -> Vec<(OwnerId, EntityRef)>;

    /// Player entity of an owner, if they are in this world.
    fn player(&self, owner: &OwnerId) -> Option<EntityRef>;

    /// Create a companion from a spawn template.
    ///
    /// # Errors
    /// [`VisPetError::TemplateNotFound`](vispet_core::VisPetError::TemplateNotFound)
    /// if the template is unknown.
    fn spawn(&mut self, spec: &SpawnSpec) -> Result<EntityRef>;

    /// Remove an entity. Returns `false` if it did not exist.
    fn remove(&mut self, entity: EntityRef) -> bool;

    /// Whether the entity exists in this world.
    fn contains(&self, entity: EntityRef) -> bool;

    /// Attach the ownership marker.
    ///
    /// # Errors
    /// [`VisPetError::EntityNotFound`](vispet_core::VisPetError::EntityNotFound).
    fn set_companion_tag(&mut self, entity: EntityRef, tag: CompanionTag) -> Result<()>;

    /// Every entity created from a companion template, with its marker if
    /// it carries one.
    fn companions(&self) -> Vec<(EntityRef, Option<CompanionTag>)>;

    /// Resize an entity's hotbar.
    ///
    /// # Errors
    /// [`VisPetError::EntityNotFound`](vispet_core::VisPetError::EntityNotFound).
    fn set_inventory_capacity(&mut self, entity: EntityRef, capacity: u16) -> Result<()>;

    /// An entity's container.
    fn container(&self, entity: EntityRef, kind: ContainerKind) -> Option<&dyn ItemContainer>;

    /// An entity's container, mutably.
    fn container_mut(&mut self, entity: EntityRef, kind: ContainerKind) -> Option<&mut dyn ItemContainer>;

    /// Apply an effect, overwriting any existing instance.
    ///
    /// # Errors
    /// [`VisPetError::EntityNotFound`](vispet_core::VisPetError::EntityNotFound).
    fn add_effect(&mut self, entity: EntityRef, effect: EffectIndex, duration_secs: f32) -> Result<()>;

    /// Remove an effect. Returns `false` if it was not present.
    fn remove_effect(&mut self, entity: EntityRef, effect: EffectIndex) -> bool;

    /// Whether an effect is currently applied.
    fn has_effect(&self, entity: EntityRef, effect: EffectIndex) -> bool;

    /// Current position.
    fn position(&self, entity: EntityRef) -> Option<Position>;

    /// Teleport.
    ///
    /// # Errors
    /// [`VisPetError::EntityNotFound`](vispet_core::VisPetError::EntityNotFound).
    fn set_position(&mut self, entity: EntityRef, position: Position) -> Result<()>;
}

/// Chat delivery to a player.
pub trait Notifier: Send + Sync {
    /// Send a message. Offline owners silently miss it.
    fn notify(&self, owner: &OwnerId, message: &str);
}

/// Discards every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _owner: &OwnerId, _message: &str) {}
}
