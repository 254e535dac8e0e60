//! In-memory host.
//!
//! A minimal entity store, notifier and effect registry good enough to run
//! the whole lifecycle without an engine. Used by the test suites and the
//! benchmarks.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use vispet_core::descriptor::{self, EffectRegistry, PET_TYPES};
use vispet_core::error::{Result, VisPetError};
use vispet_core::types::{EffectIndex, EntityRef, ItemStack, OwnerId, Position, WorldId};

use crate::components::{CompanionTag, ContainerKind, SpawnSpec};
use crate::host::{EntityStore, ItemContainer, Notifier};

/// Player hotbar size.
pub const PLAYER_HOTBAR_SLOTS: u16 = 9;
/// Player storage size.
pub const PLAYER_STORAGE_SLOTS: u16 = 36;

// Entity refs are unique across every simulated world.
static NEXT_ENTITY: AtomicU64 = AtomicU64::new(1);

fn next_entity() -> EntityRef {
    EntityRef(NEXT_ENTITY.fetch_add(1, Ordering::Relaxed))
}

// ---------------------------------------------------------------------------
// Container
// ---------------------------------------------------------------------------

/// A vector of optional stacks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimContainer {
    slots: Vec<Option<ItemStack>>,
}

impl SimContainer {
    /// An empty container with `capacity` slots.
    #[must_use]
    pub fn new(capacity: u16) -> Self {
        Self {
            slots: vec![None; usize::from(capacity)],
        }
    }

    /// Grow or shrink. Stacks beyond a shrunk capacity are lost.
    pub fn resize(&mut self, capacity: u16) {
        self.slots.resize(usize::from(capacity), None);
    }
}

impl ItemContainer for SimContainer {
    fn capacity(&self) -> u16 {
        u16::try_from(self.slots.len()).unwrap_or(u16::MAX)
    }

    fn get(&self, slot: u16) -> Option<&ItemStack> {
        self.slots.get(usize::from(slot)).and_then(Option::as_ref)
    }

    fn set(&mut self, slot: u16, stack: Option<ItemStack>) {
        if let Some(cell) = self.slots.get_mut(usize::from(slot)) {
            *cell = stack.filter(|s| !s.is_empty());
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum SimKind {
    Player(OwnerId),
    Spawned { template: &'static str, appearance: &'static str, scale: f32 },
}

#[derive(Debug, Clone)]
struct SimEntity {
    kind: SimKind,
    position: Position,
    effects: HashMap<EffectIndex, f32>,
    hotbar: SimContainer,
    storage: SimContainer,
    tag: Option<CompanionTag>,
}

impl SimEntity {
    fn container(&self, kind: ContainerKind) -> &SimContainer {
        match kind {
            ContainerKind::Hotbar => &self.hotbar,
            ContainerKind::Storage => &self.storage,
        }
    }

    fn container_mut(&mut self, kind: ContainerKind) -> &mut SimContainer {
        match kind {
            ContainerKind::Hotbar => &mut self.hotbar,
            ContainerKind::Storage => &mut self.storage,
        }
    }
}

/// One simulated world.
#[derive(Debug)]
pub struct SimStore {
    world: WorldId,
    entities: BTreeMap<EntityRef, SimEntity>,
    missing_templates: HashSet<&'static str>,
}

impl SimStore {
    /// An empty world.
    #[must_use]
    pub fn new(world: impl Into<String>) -> Self {
        Self {
            world: WorldId::new(world),
            entities: BTreeMap::new(),
            missing_templates: HashSet::new(),
        }
    }

    /// Put a player into the world.
    pub fn add_player(&mut self, owner: OwnerId, position: Position) -> EntityRef {
        let entity = next_entity();
        self.entities.insert(
            entity,
            SimEntity {
                kind: SimKind::Player(owner),
                position,
                effects: HashMap::new(),
                hotbar: SimContainer::new(PLAYER_HOTBAR_SLOTS),
                storage: SimContainer::new(PLAYER_STORAGE_SLOTS),
                tag: None,
            },
        );
        entity
    }

    /// Take a player out of the world, returning their hotbar and storage
    /// so they can be carried to another world.
    pub fn take_player(&mut self, owner: &OwnerId) -> Option<(SimContainer, SimContainer)> {
        let entity = self.player(owner)?;
        self.entities.remove(&entity).map(|e| (e.hotbar, e.storage))
    }

    /// Put a player into the world with the containers they carried.
    pub fn insert_player(&mut self, owner: OwnerId, position: Position, carried: (SimContainer, SimContainer)) -> EntityRef {
        let entity = self.add_player(owner, position);
        if let Some(e) = self.entities.get_mut(&entity) {
            e.hotbar = carried.0;
            e.storage = carried.1;
        }
        entity
    }

    /// Place a stack in the first empty slot of a player's hotbar.
    pub fn give(&mut self, entity: EntityRef, stack: ItemStack) -> Option<u16> {
        let hotbar = &mut self.entities.get_mut(&entity)?.hotbar;
        let slot = hotbar.first_empty()?;
        hotbar.set(slot, Some(stack));
        Some(slot)
    }

    /// Empty every slot of an entity's containers holding `item_id`.
    pub fn take_all(&mut self, entity: EntityRef, item_id: &str) -> usize {
        let Some(e) = self.entities.get_mut(&entity) else {
            return 0;
        };
        ContainerKind::ALL
            .iter()
            .map(|kind| e.container_mut(*kind).remove_matching(&|s: &ItemStack| s.item_id == item_id))
            .sum()
    }

    /// Make spawns from `template` fail.
    pub fn forbid_template(&mut self, template: &'static str) {
        self.missing_templates.insert(template);
    }

    /// Number of companion entities.
    #[must_use]
    pub fn companion_count(&self) -> usize {
        self.entities
            .values()
            .filter(|e| matches!(e.kind, SimKind::Spawned { .. }))
            .count()
    }

    /// Appearance and scale a companion was spawned with.
    #[must_use]
    pub fn appearance(&self, entity: EntityRef) -> Option<(&'static str, f32)> {
        match self.entities.get(&entity)?.kind {
            SimKind::Spawned { appearance, scale, .. } => Some((appearance, scale)),
            SimKind::Player(_) => None,
        }
    }

    /// Remaining duration of an effect on an entity.
    #[must_use]
    pub fn effect_duration(&self, entity: EntityRef, effect: EffectIndex) -> Option<f32> {
        self.entities.get(&entity)?.effects.get(&effect).copied()
    }
}

impl EntityStore for SimStore {
    fn world(&self) -> &WorldId {
        &self.world
    }

    fn players(&self) -> Vec<(OwnerId, EntityRef)> {
        self.entities
            .iter()
            .filter_map(|(entity, e)| match e.kind {
                SimKind::Player(owner) => Some((owner, *entity)),
                SimKind::Spawned { .. } => None,
            })
            .collect()
    }

    fn player(&self, owner: &OwnerId) -> Option<EntityRef> {
        self.entities
            .iter()
            .find(|(_, e)| matches!(e.kind, SimKind::Player(o) if o == *owner))
            .map(|(entity, _)| *entity)
    }

    fn spawn(&mut self, spec: &SpawnSpec) -> Result<EntityRef> {
        if self.missing_templates.contains(spec.template) || descriptor::by_template(spec.template).is_none() {
            return Err(VisPetError::TemplateNotFound(spec.template.to_string()));
        }
        let entity = next_entity();
        self.entities.insert(
            entity,
            SimEntity {
                kind: SimKind::Spawned {
                    template: spec.template,
                    appearance: spec.appearance,
                    scale: spec.scale,
                },
                position: spec.position,
                effects: HashMap::new(),
                hotbar: SimContainer::default(),
                storage: SimContainer::default(),
                tag: None,
            },
        );
        Ok(entity)
    }

    fn remove(&mut self, entity: EntityRef) -> bool {
        self.entities.remove(&entity).is_some()
    }

    fn contains(&self, entity: EntityRef) -> bool {
        self.entities.contains_key(&entity)
    }

    fn set_companion_tag(&mut self, entity: EntityRef, tag: CompanionTag) -> Result<()> {
        let e = self.entities.get_mut(&entity).ok_or(VisPetError::EntityNotFound(entity))?;
        e.tag = Some(tag);
        Ok(())
    }

    fn companions(&self) -> Vec<(EntityRef, Option<CompanionTag>)> {
        self.entities
            .iter()
            .filter_map(|(entity, e)| match e.kind {
                SimKind::Spawned { template, .. } if descriptor::by_template(template).is_some() => Some((*entity, e.tag)),
                _ => None,
            })
            .collect()
    }

    fn set_inventory_capacity(&mut self, entity: EntityRef, capacity: u16) -> Result<()> {
        let e = self.entities.get_mut(&entity).ok_or(VisPetError::EntityNotFound(entity))?;
        e.hotbar.resize(capacity);
        Ok(())
    }

    fn container(&self, entity: EntityRef, kind: ContainerKind) -> Option<&dyn ItemContainer> {
        self.entities
            .get(&entity)
            .map(|e| e.container(kind) as &dyn ItemContainer)
    }

    fn container_mut(&mut self, entity: EntityRef, kind: ContainerKind) -> Option<&mut dyn ItemContainer> {
        self.entities
            .get_mut(&entity)
            .map(|e| e.container_mut(kind) as &mut dyn ItemContainer)
    }

    fn add_effect(&mut self, entity: EntityRef, effect: EffectIndex, duration_secs: f32) -> Result<()> {
        let e = self.entities.get_mut(&entity).ok_or(VisPetError::EntityNotFound(entity))?;
        e.effects.insert(effect, duration_secs);
        Ok(())
    }

    fn remove_effect(&mut self, entity: EntityRef, effect: EffectIndex) -> bool {
        self.entities
            .get_mut(&entity)
            .is_some_and(|e| e.effects.remove(&effect).is_some())
    }

    fn has_effect(&self, entity: EntityRef, effect: EffectIndex) -> bool {
        self.entities
            .get(&entity)
            .is_some_and(|e| e.effects.contains_key(&effect))
    }

    fn position(&self, entity: EntityRef) -> Option<Position> {
        self.entities.get(&entity).map(|e| e.position)
    }

    fn set_position(&mut self, entity: EntityRef, position: Position) -> Result<()> {
        let e = self.entities.get_mut(&entity).ok_or(VisPetError::EntityNotFound(entity))?;
        e.position = position;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Notifier and effect registry
// ---------------------------------------------------------------------------

/// Keeps every message for later inspection.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(OwnerId, String)>>,
}

impl RecordingNotifier {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent to one owner, oldest first.
    #[must_use]
    pub fn messages_for(&self, owner: &OwnerId) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|(o, _)| o == owner)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Whether any message to `owner` contains `needle`.
    #[must_use]
    pub fn received(&self, owner: &OwnerId, needle: &str) -> bool {
        self.messages.lock().iter().any(|(o, m)| o == owner && m.contains(needle))
    }

    /// Drop every recorded message.
    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, owner: &OwnerId, message: &str) {
        self.messages.lock().push((*owner, message.to_string()));
    }
}

/// Fixed effect index table.
#[derive(Debug, Clone, Default)]
pub struct StaticEffects {
    indices: HashMap<String, EffectIndex>,
}

impl StaticEffects {
    /// Every shipped descriptor's effects: toggle at `2i`, active at `2i + 1`.
    #[must_use]
    pub fn standard() -> Self {
        let mut indices = HashMap::new();
        for (i, t) in (0u32..).zip(PET_TYPES.iter()) {
            indices.insert(t.toggle_effect_id.to_string(), EffectIndex(2 * i));
            indices.insert(t.active_effect_id.to_string(), EffectIndex(2 * i + 1));
        }
        Self { indices }
    }
}

impl EffectRegistry for StaticEffects {
    fn index_of(&self, effect_id: &str) -> Option<EffectIndex> {
        self.indices.get(effect_id).copied()
    }
}
