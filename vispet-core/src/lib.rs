//! # VisPet Core Library
//!
//! Game-agnostic lifecycle of player-bound companions.
//!
//! A companion is a summonable creature tied one-to-one to an owning player.
//! This crate holds everything about that relation that does not need a
//! host engine:
//!
//! - [`descriptor`]: the static table of companion variants and their
//!   lazily resolved effect indices
//! - [`toggle`]: edge detection turning a held toggle signal into one action
//! - [`ownership`]: the concurrent owner → companion index and the
//!   per-owner pending marker
//! - [`persistence`]: companion inventories and trial timer records on disk
//! - [`trial`]: active-time accounting for trial grants
//!
//! The host integration (world task queues, spawn/despawn protocol,
//! migration, reconciliation) lives in `vispet-server`.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod ownership;
pub mod persistence;
pub mod toggle;
pub mod trial;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::VisPetConfig;
pub use descriptor::{EffectRegistry, PetTypeDescriptor, PET_TYPES};
pub use error::{Result, VisPetError};
pub use ownership::{OwnershipIndex, PendingGuard, Registration};
pub use toggle::{ToggleAction, ToggleDetector, ToggleInput, ToggleState};
pub use trial::{format_duration, SerialReconcile, TrialTimers};
pub use types::*;
