//! Edge detection for the companion toggle signal.
//!
//! Using a summon item applies a short-lived toggle effect to the player.
//! The effect stays present for many ticks, but it must produce exactly one
//! spawn or despawn per continuous assertion. Each owner runs a two-state
//! machine:
//!
//! ```text
//!            signal present / fire
//!   Idle ─────────────────────────────▶ Toggled
//!    ▲                                    │
//!    └──────────── signal absent ─────────┘
//! ```
//!
//! While a spawn or despawn for the owner is still in flight the machine is
//! frozen: the request is dropped and the state is left as it was.

use dashmap::DashMap;

use crate::descriptor::PetTypeDescriptor;
use crate::types::OwnerId;

/// Per-owner toggle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToggleState {
    /// No signal seen since the last release.
    #[default]
    Idle,
    /// Signal seen and acted on; waiting for it to clear.
    Toggled,
}

/// Action requested by a rising edge.
#[derive(Debug, Clone, Copy)]
pub enum ToggleAction {
    /// Summon a companion of this variant.
    Spawn(&'static PetTypeDescriptor),
    /// Dismiss the active companion.
    Despawn,
}

impl PartialEq for ToggleAction {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Spawn(a), Self::Spawn(b)) => std::ptr::eq(*a, *b),
            (Self::Despawn, Self::Despawn) => true,
            _ => false,
        }
    }
}

impl Eq for ToggleAction {}

/// What the detector sees for one owner on one tick.
#[derive(Debug, Clone, Copy)]
pub struct ToggleInput {
    /// Variant whose toggle signal is present, if any.
    pub signal: Option<&'static PetTypeDescriptor>,
    /// A spawn or despawn is in flight for this owner.
    pub pending: bool,
    /// The owner currently has an active companion.
    pub active: bool,
}

/// Concurrent per-owner edge detector.
#[derive(Debug, Default)]
pub struct ToggleDetector {
    states: DashMap<OwnerId, ToggleState>,
}

impl ToggleDetector {
    /// Create an empty detector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one tick of input; returns the action to perform, if any.
    pub fn observe(&self, owner: OwnerId, input: ToggleInput) -> Option<ToggleAction> {
        if input.pending {
            return None;
        }
        let Some(descriptor) = input.signal else {
            self.states.remove(&owner);
            return None;
        };
        let mut state = self.states.entry(owner).or_default();
        if *state == ToggleState::Toggled {
            return None;
        }
        *state = ToggleState::Toggled;
        if input.active {
            Some(ToggleAction::Despawn)
        } else {
            Some(ToggleAction::Spawn(descriptor))
        }
    }

    /// Return an owner to `Idle` without waiting for the signal to clear.
    ///
    /// Used when a fired spawn is rejected before it was enqueued, so the
    /// next tick may try again.
    pub fn rearm(&self, owner: &OwnerId) {
        self.states.remove(owner);
    }

    /// Current state of an owner.
    #[must_use]
    pub fn state(&self, owner: &OwnerId) -> ToggleState {
        self.states.get(owner).map_or(ToggleState::Idle, |s| *s)
    }

    /// Forget an owner (disconnect).
    pub fn forget(&self, owner: &OwnerId) {
        self.states.remove(owner);
    }

    /// Number of owners currently in `Toggled`.
    #[must_use]
    pub fn toggled_count(&self) -> usize {
        self.states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::PET_TYPES;

    fn fox() -> &'static PetTypeDescriptor {
        &PET_TYPES[0]
    }

    fn present(active: bool) -> ToggleInput {
        ToggleInput {
            signal: Some(fox()),
            pending: false,
            active,
        }
    }

    fn absent() -> ToggleInput {
        ToggleInput {
            signal: None,
            pending: false,
            active: false,
        }
    }

    #[test]
    fn held_signal_fires_once() {
        let detector = ToggleDetector::new();
        let owner = OwnerId::new();
        let fired: Vec<_> = (0..10)
            .filter_map(|_| detector.observe(owner, present(false)))
            .collect();
        assert_eq!(fired, vec![ToggleAction::Spawn(fox())]);
        assert_eq!(detector.state(&owner), ToggleState::Toggled);
    }

    #[test]
    fn release_rearms() {
        let detector = ToggleDetector::new();
        let owner = OwnerId::new();
        assert!(detector.observe(owner, present(false)).is_some());
        assert!(detector.observe(owner, absent()).is_none());
        assert_eq!(detector.state(&owner), ToggleState::Idle);
        assert_eq!(detector.observe(owner, present(true)), Some(ToggleAction::Despawn));
    }

    #[test]
    fn pending_drops_and_freezes() {
        let detector = ToggleDetector::new();
        let owner = OwnerId::new();
        let pending = ToggleInput {
            pending: true,
            ..present(false)
        };
        assert!(detector.observe(owner, pending).is_none());
        assert_eq!(detector.state(&owner), ToggleState::Idle);

        assert!(detector.observe(owner, present(false)).is_some());
        // Signal disappearing while pending does not rearm.
        let released_while_pending = ToggleInput {
            signal: None,
            pending: true,
            active: false,
        };
        assert!(detector.observe(owner, released_while_pending).is_none());
        assert_eq!(detector.state(&owner), ToggleState::Toggled);
    }

    #[test]
    fn owners_are_independent() {
        let detector = ToggleDetector::new();
        let a = OwnerId::new();
        let b = OwnerId::new();
        assert!(detector.observe(a, present(false)).is_some());
        assert!(detector.observe(b, present(false)).is_some());
        assert_eq!(detector.toggled_count(), 2);
        detector.forget(&a);
        assert_eq!(detector.state(&a), ToggleState::Idle);
        assert_eq!(detector.state(&b), ToggleState::Toggled);
    }
}
