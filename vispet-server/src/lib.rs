//! # vispet-server - Host Integration for VisPet
//!
//! Connects the game-agnostic `vispet-core` to a host engine's worlds.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Host engine                  │
//! │  world tick ─┐          events ─┐            │
//! │              ▼                  ▼            │
//! │  ┌────────────────┐   ┌──────────────────┐   │
//! │  │    Systems     │   │ Hooks / Commands │   │
//! │  └───────┬────────┘   └────────┬─────────┘   │
//! │          ▼                     ▼             │
//! │  ┌────────────────────────────────────────┐  │
//! │  │  Coordinator ── Migration ── Trial     │  │
//! │  └───────────────────┬────────────────────┘  │
//! │                      ▼                       │
//! │        per-world task queues (mpsc)          │
//! │                      ▼                       │
//! │               EntityStore (host)             │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `host`: traits the engine implements (entity store, containers, notifier)
//! - `world`: per-world task queues and the world registry
//! - `coordinator`: spawn/despawn protocol
//! - `migration`: two-phase relocation across worlds
//! - `orphan`: reconciliation sweep and companion upkeep
//! - `trial`: trial expiry, grants, and the periodic ticker
//! - `systems`: per-tick detection
//! - `hooks`: connection events and the ownership predicate
//! - `commands`: player/admin commands
//! - `runtime`: wiring everything from a config
//! - `sim`: in-memory host for tests and benches

#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod commands;
pub mod components;
pub mod coordinator;
pub mod hooks;
pub mod host;
pub mod logging;
pub mod migration;
pub mod orphan;
pub mod runtime;
pub mod sim;
pub mod systems;
pub mod trial;
pub mod world;

pub use coordinator::{DespawnOutcome, DespawnReason, LifecycleCoordinator, SpawnRejected, SpawnRequest};
pub use host::{EntityStore, ItemContainer, Notifier};
pub use runtime::VisPetRuntime;
pub use world::{WorldHandle, WorldRegistry, WorldThread};
