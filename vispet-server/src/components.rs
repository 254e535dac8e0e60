//! Plain data attached to host entities.
//!
//! The companion carries nothing but an ownership tag. Who owns what is
//! answered by the [`OwnershipIndex`](vispet_core::ownership::OwnershipIndex),
//! never by following references stored on entities.

use serde::{Deserialize, Serialize};
use vispet_core::descriptor::PetTypeDescriptor;
use vispet_core::types::{OwnerId, Position};

/// Ownership marker stored on a companion entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompanionTag {
    /// Owning player.
    pub owner: OwnerId,
}

/// Which of an entity's item containers to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerKind {
    /// Quick-access row. For companions this is the whole carried inventory.
    Hotbar,
    /// Main storage.
    Storage,
}

impl ContainerKind {
    /// Every kind, in the order a player's inventory is searched.
    pub const ALL: [ContainerKind; 2] = [ContainerKind::Hotbar, ContainerKind::Storage];
}

/// What the spawn factory needs to create a companion.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnSpec {
    /// NPC role / template name.
    pub template: &'static str,
    /// Model asset.
    pub appearance: &'static str,
    /// Model scale.
    pub scale: f32,
    /// Where to place the entity.
    pub position: Position,
}

impl SpawnSpec {
    /// Build the spec for a descriptor at a position.
    #[must_use]
    pub fn for_descriptor(descriptor: &'static PetTypeDescriptor, position: Position) -> Self {
        Self {
            template: descriptor.spawn_template,
            appearance: descriptor.appearance,
            scale: descriptor.scale,
            position,
        }
    }
}
