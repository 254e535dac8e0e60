//! Shared harness: a runtime over simulated worlds with a manual clock.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use tempfile::TempDir;

use vispet_core::clock::ManualClock;
use vispet_core::config::VisPetConfig;
use vispet_core::descriptor::{PetTypeDescriptor, ResolvedEffects, PET_TYPES};
use vispet_core::types::{EntityRef, ItemStack, OwnerId, Position, WorldId};
use vispet_server::sim::{RecordingNotifier, SimStore, StaticEffects};
use vispet_server::systems::TickReport;
use vispet_server::trial::ReadyOutcome;
use vispet_server::{EntityStore, VisPetRuntime, WorldThread};

pub const START_MS: i64 = 1_700_000_000_000;
pub const HOUR_MS: i64 = 3_600_000;

pub struct World {
    pub store: SimStore,
    pub thread: WorldThread,
}

pub struct Harness {
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub effects: StaticEffects,
    pub runtime: VisPetRuntime,
    pub worlds: BTreeMap<String, World>,
}

pub fn fox() -> &'static PetTypeDescriptor {
    &PET_TYPES[0]
}

pub fn cow() -> &'static PetTypeDescriptor {
    &PET_TYPES[1]
}

impl Harness {
    /// Runtime without automatic trial grants, one world named `overworld`.
    pub fn new() -> Self {
        Self::with_config(|c| c.trial.grant_on_first_login = false)
    }

    /// Runtime with default trial settings.
    pub fn trial() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut VisPetConfig)) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = VisPetConfig::default();
        config.persistence.inventory_dir = dir.path().join("vispet");
        config.persistence.trial_dir = dir.path().join("freepet");
        tweak(&mut config);

        let clock = Arc::new(ManualClock::new(START_MS));
        let notifier = Arc::new(RecordingNotifier::new());
        let effects = StaticEffects::standard();
        let runtime = VisPetRuntime::new(config, clock.clone(), Arc::new(effects.clone()), notifier.clone())
            .expect("runtime");
        let mut harness = Self {
            dir,
            clock,
            notifier,
            effects,
            runtime,
            worlds: BTreeMap::new(),
        };
        harness.add_world("overworld");
        harness
    }

    pub fn add_world(&mut self, name: &str) {
        let thread = self.runtime.open_world(WorldId::new(name));
        self.worlds.insert(
            name.to_string(),
            World {
                store: SimStore::new(name),
                thread,
            },
        );
    }

    /// Unregister a world and drop its queue with whatever is still in it.
    pub fn remove_world(&mut self, name: &str) -> SimStore {
        self.runtime.close_world(&WorldId::new(name));
        self.worlds.remove(name).expect("world").store
    }

    pub fn world(&mut self, name: &str) -> &mut World {
        self.worlds.get_mut(name).expect("world")
    }

    pub fn store(&self, name: &str) -> &SimStore {
        &self.worlds.get(name).expect("world").store
    }

    pub fn effects_of(&self, pet: &'static PetTypeDescriptor) -> ResolvedEffects {
        pet.effects(&self.effects).expect("effects resolve")
    }

    // ------------------------------------------------------------------
    // Players
    // ------------------------------------------------------------------

    /// Add a player holding `items` and fire the ready hook.
    pub fn join(&mut self, world: &str, owner: OwnerId, items: &[&str]) -> (EntityRef, ReadyOutcome) {
        let hooks = self.runtime.hooks().clone();
        let w = self.world(world);
        let player = w.store.add_player(owner, Position::new(10.0, 64.0, 10.0));
        for item in items {
            w.store.give(player, ItemStack::new(*item, 1)).expect("room");
        }
        let outcome = hooks.on_ready(&mut w.store, owner, player);
        (player, outcome)
    }

    /// Move a player between worlds, carrying their inventory.
    pub fn travel(&mut self, from: &str, to: &str, owner: OwnerId, at: Position) -> EntityRef {
        let carried = self.world(from).store.take_player(&owner).expect("player");
        self.world(to).store.insert_player(owner, at, carried)
    }

    pub fn player(&self, world: &str, owner: &OwnerId) -> EntityRef {
        self.store(world).player(owner).expect("player present")
    }

    pub fn press(&mut self, world: &str, owner: OwnerId, pet: &'static PetTypeDescriptor) {
        let toggle = self.effects_of(pet).toggle;
        let store = &mut self.world(world).store;
        let player = store.player(&owner).expect("player");
        store.add_effect(player, toggle, 0.5).expect("effect");
    }

    pub fn release(&mut self, world: &str, owner: OwnerId) {
        let toggles: Vec<_> = PET_TYPES.iter().map(|t| self.effects_of(t).toggle).collect();
        let store = &mut self.world(world).store;
        let player = store.player(&owner).expect("player");
        for toggle in toggles {
            store.remove_effect(player, toggle);
        }
    }

    /// Press, tick, release, tick.
    pub fn toggle(&mut self, world: &str, owner: OwnerId, pet: &'static PetTypeDescriptor) {
        self.press(world, owner, pet);
        self.tick(world);
        self.release(world, owner);
        self.tick(world);
    }

    // ------------------------------------------------------------------
    // Ticking
    // ------------------------------------------------------------------

    /// Detection plus queue drain.
    pub fn tick(&mut self, world: &str) -> TickReport {
        let runtime = self.runtime.clone();
        let w = self.world(world);
        runtime.tick_world(&mut w.store, &mut w.thread)
    }

    /// Detection only; queued tasks stay queued.
    pub fn detect(&mut self, world: &str) -> TickReport {
        let systems = self.runtime.systems().clone();
        systems.tick_world(&mut self.world(world).store)
    }

    /// Run queued tasks only.
    pub fn drain(&mut self, world: &str) -> usize {
        let w = self.world(world);
        w.thread.run_pending(&mut w.store)
    }

    pub fn tick_all(&mut self) {
        let names: Vec<String> = self.worlds.keys().cloned().collect();
        for name in names {
            self.tick(&name);
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn is_active(&self, owner: &OwnerId) -> bool {
        self.runtime.coordinator().is_active(owner)
    }

    pub fn is_pending(&self, owner: &OwnerId) -> bool {
        self.runtime.coordinator().index().is_pending(owner)
    }

    pub fn companion(&self, owner: &OwnerId) -> EntityRef {
        self.runtime
            .coordinator()
            .index()
            .companion(owner)
            .expect("registered companion")
    }
}
