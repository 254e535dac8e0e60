//! Static companion variants and their lazily resolved effect indices.
//!
//! Effect IDs are strings in the asset files but the host's effect
//! controller works on integer indices. Each descriptor resolves its two
//! indices the first time it is asked and caches them for the lifetime of
//! the process. A failed resolution (assets not loaded yet) is not cached,
//! so the next lookup tries again.

use std::sync::OnceLock;

use crate::types::EffectIndex;

/// Resolves effect asset IDs to integer indices.
pub trait EffectRegistry: Send + Sync {
    /// Index of the named effect, or `None` if no such asset is loaded.
    fn index_of(&self, effect_id: &str) -> Option<EffectIndex>;
}

/// Indices of a descriptor's toggle and active effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedEffects {
    /// The transient signal that toggles the companion.
    pub toggle: EffectIndex,
    /// The marker shown on the owner while the companion is out.
    pub active: EffectIndex,
}

/// One companion variant.
#[derive(Debug)]
pub struct PetTypeDescriptor {
    /// Item whose use applies the toggle effect.
    pub item_id: &'static str,
    /// Transient toggle signal effect.
    pub toggle_effect_id: &'static str,
    /// Marker effect kept on the owner while summoned.
    pub active_effect_id: &'static str,
    /// Spawn template (NPC role) of the companion.
    pub spawn_template: &'static str,
    /// Model asset applied on spawn.
    pub appearance: &'static str,
    /// Model scale applied on spawn.
    pub scale: f32,
    resolved: OnceLock<ResolvedEffects>,
}

impl PetTypeDescriptor {
    /// Build a descriptor. `const` so the table can live in a `static`.
    #[must_use]
    pub const fn new(
        item_id: &'static str,
        toggle_effect_id: &'static str,
        active_effect_id: &'static str,
        spawn_template: &'static str,
        appearance: &'static str,
        scale: f32,
    ) -> Self {
        Self {
            item_id,
            toggle_effect_id,
            active_effect_id,
            spawn_template,
            appearance,
            scale,
            resolved: OnceLock::new(),
        }
    }

    /// Resolved effect indices, resolving and caching them on first success.
    pub fn effects(&self, registry: &dyn EffectRegistry) -> Option<ResolvedEffects> {
        if let Some(resolved) = self.resolved.get() {
            return Some(*resolved);
        }
        let toggle = registry.index_of(self.toggle_effect_id)?;
        let active = registry.index_of(self.active_effect_id)?;
        Some(*self.resolved.get_or_init(|| ResolvedEffects { toggle, active }))
    }

    /// Cached indices without attempting resolution.
    #[must_use]
    pub fn cached_effects(&self) -> Option<ResolvedEffects> {
        self.resolved.get().copied()
    }
}

/// Every companion variant, in toggle priority order.
pub static PET_TYPES: [PetTypeDescriptor; 4] = [
    PetTypeDescriptor::new("Loot_Fox_Summon", "Loot_Fox_Toggle", "Loot_Fox_Active", "loot_buddy", "Fox", 1.0),
    PetTypeDescriptor::new("Loot_Cow_Summon", "Loot_Cow_Toggle", "Loot_Cow_Active", "loot_buddy_cow", "Cow_Undead", 0.5),
    PetTypeDescriptor::new("Loot_Sheep_Summon", "Loot_Sheep_Toggle", "Loot_Sheep_Active", "loot_buddy_sheep", "Lamb", 1.0),
    PetTypeDescriptor::new("Loot_Hound_Summon", "Loot_Hound_Toggle", "Loot_Hound_Active", "loot_buddy_hound", "Hound_Bleached", 1.0),
];

/// All descriptors.
#[must_use]
pub fn all() -> &'static [PetTypeDescriptor] {
    &PET_TYPES
}

/// Descriptor whose summon item is `item_id`.
#[must_use]
pub fn by_item(item_id: &str) -> Option<&'static PetTypeDescriptor> {
    PET_TYPES.iter().find(|t| t.item_id == item_id)
}

/// Descriptor whose spawn template is `template`.
#[must_use]
pub fn by_template(template: &str) -> Option<&'static PetTypeDescriptor> {
    PET_TYPES.iter().find(|t| t.spawn_template == template)
}

/// Whether `item_id` is a summon item of any descriptor or the trial item.
#[must_use]
pub fn is_summon_item(item_id: &str, trial_item_id: &str) -> bool {
    item_id == trial_item_id || by_item(item_id).is_some()
}

/// Resolve every descriptor once. Returns how many resolved.
pub fn warm_up(registry: &dyn EffectRegistry) -> usize {
    PET_TYPES.iter().filter(|t| t.effects(registry).is_some()).count()
}
