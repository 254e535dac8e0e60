//! Error types for the VisPet core library.

use thiserror::Error;

use crate::types::{EntityRef, OwnerId, WorldId};

/// Top-level error type for all VisPet operations.
#[derive(Error, Debug)]
pub enum VisPetError {
    /// The spawn template named by a pet descriptor is not known to the host.
    #[error("Spawn template not found: {0}")]
    TemplateNotFound(String),

    /// An effect asset could not be resolved to an index.
    #[error("Effect not resolved: {0}")]
    EffectNotResolved(String),

    /// An entity handle no longer refers to a live entity.
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityRef),

    /// No task queue is registered for the world.
    #[error("World not registered: {0}")]
    WorldNotRegistered(WorldId),

    /// The world's task queue has shut down.
    #[error("World closed: {0}")]
    WorldClosed(WorldId),

    /// The owner has no active companion.
    #[error("No active companion for owner {0}")]
    NotActive(OwnerId),

    /// A persisted record could not be parsed.
    #[error("Invalid record at line {line}: {reason}")]
    InvalidRecord {
        /// 1-based line number.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, VisPetError>;
