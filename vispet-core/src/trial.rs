//! Trial timer accounting.
//!
//! A trial grant carries an active-time budget that only drains while the
//! trial companion is summoned. The running interval lives in memory as an
//! `active_since` timestamp; the durable record holds what was left when
//! the last interval closed. Every interval is closed exactly once, either
//! by [`TrialTimers::stop`] (despawn, disconnect) or by
//! [`TrialTimers::poll_expired`] (budget exhausted while summoned), because
//! both claim the interval by removing it from the concurrent map before
//! writing the settled budget.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::persistence::{TrialStore, TrialTimerRecord};
use crate::types::{OwnerId, Serial};

/// Outcome of matching an item's serial against the owner's record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialReconcile {
    /// Item and record already agree.
    Unchanged,
    /// The item carried a serial the record did not know; the record now
    /// tracks it with a fresh budget.
    Adopted(Serial),
    /// The item had no serial; the caller must burn this one into it.
    Stamp(Serial),
}

/// In-memory running intervals plus the durable per-owner records.
pub struct TrialTimers {
    store: TrialStore,
    clock: Arc<dyn Clock>,
    duration_ms: i64,
    active_since: DashMap<OwnerId, i64>,
}

impl std::fmt::Debug for TrialTimers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrialTimers")
            .field("store", &self.store)
            .field("duration_ms", &self.duration_ms)
            .field("running", &self.active_since.len())
            .finish_non_exhaustive()
    }
}

impl TrialTimers {
    /// Create the accountant.
    #[must_use]
    pub fn new(store: TrialStore, clock: Arc<dyn Clock>, duration_ms: i64) -> Self {
        Self {
            store,
            clock,
            duration_ms,
            active_since: DashMap::new(),
        }
    }

    /// The durable store.
    #[must_use]
    pub fn store(&self) -> &TrialStore {
        &self.store
    }

    /// Budget of a fresh grant.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        self.duration_ms
    }

    /// Current wall-clock time.
    #[must_use]
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Whether an interval is open for the owner.
    #[must_use]
    pub fn is_running(&self, owner: &OwnerId) -> bool {
        self.active_since.contains_key(owner)
    }

    /// Owners with an open interval.
    #[must_use]
    pub fn running_owners(&self) -> Vec<OwnerId> {
        self.active_since.iter().map(|e| *e.key()).collect()
    }

    /// Open an interval at the current time. An already open interval is
    /// kept, so re-spawning mid-migration does not lose elapsed time.
    /// Returns `true` if a new interval was opened.
    pub fn start(&self, owner: OwnerId) -> bool {
        let now = self.clock.now_ms();
        let mut opened = false;
        self.active_since.entry(owner).or_insert_with(|| {
            opened = true;
            now
        });
        opened
    }

    /// Close the owner's interval and persist the reduced budget.
    ///
    /// Returns the remaining budget after settling, or `None` if no interval
    /// was open. If the record cannot be read the interval stays open and
    /// is charged by a later stop or expiry check. Save failures are
    /// logged; the interval is closed either way.
    pub fn stop(&self, owner: &OwnerId) -> Option<i64> {
        let since = *self.active_since.get(owner)?;
        let mut record = match self.store.load(owner) {
            Ok(record) => record,
            Err(e) => {
                warn!(owner = %owner, error = %e, "Could not load trial record, interval left open");
                return None;
            }
        };
        // Lost a race with poll_expired(): that path already settled it.
        self.active_since.remove_if(owner, |_, s| *s == since)?;
        let elapsed = (self.clock.now_ms() - since).max(0);
        record.remaining_ms = (record.remaining_ms - elapsed).max(0);
        if let Err(e) = self.store.save(owner, &record) {
            warn!(owner = %owner, error = %e, "Could not persist settled trial budget");
        }
        info!(owner = %owner, elapsed_ms = elapsed, remaining_ms = record.remaining_ms, "Trial interval closed");
        Some(record.remaining_ms)
    }

    /// Remaining budget right now, counting the open interval if any.
    ///
    /// # Errors
    /// Returns an I/O error if the record cannot be read.
    pub fn remaining_ms(&self, owner: &OwnerId) -> Result<i64> {
        let record = self.store.load(owner)?;
        let running = self
            .active_since
            .get(owner)
            .map_or(0, |since| (self.clock.now_ms() - *since).max(0));
        Ok(record.remaining_ms - running)
    }

    /// Close every interval whose budget is exhausted, persisting a zero
    /// budget for each. Returns the owners that expired.
    pub fn poll_expired(&self) -> Vec<OwnerId> {
        let now = self.clock.now_ms();
        let mut expired = Vec::new();
        for (owner, since) in self
            .active_since
            .iter()
            .map(|e| (*e.key(), *e.value()))
            .collect::<Vec<_>>()
        {
            let mut record = match self.store.load(&owner) {
                Ok(record) => record,
                Err(e) => {
                    warn!(owner = %owner, error = %e, "Could not load trial record for expiry check");
                    continue;
                }
            };
            if record.remaining_ms - (now - since) > 0 {
                continue;
            }
            // Lost a race with stop(): that path already settled the interval.
            if self.active_since.remove_if(&owner, |_, s| *s == since).is_none() {
                continue;
            }
            record.remaining_ms = 0;
            if let Err(e) = self.store.save(&owner, &record) {
                warn!(owner = %owner, error = %e, "Could not persist expired trial budget");
            }
            info!(owner = %owner, "Trial budget exhausted");
            expired.push(owner);
        }
        expired
    }

    /// Match the serial found on the owner's trial item with their record.
    ///
    /// # Errors
    /// Returns an I/O error if the record cannot be read or written.
    pub fn reconcile_serial(&self, owner: &OwnerId, item_serial: Option<&Serial>) -> Result<SerialReconcile> {
        let record = self.store.load(owner)?;
        match item_serial {
            Some(serial) if record.serial.as_ref() == Some(serial) => Ok(SerialReconcile::Unchanged),
            Some(serial) => {
                self.store
                    .save(owner, &TrialTimerRecord::granted(serial.clone(), self.duration_ms))?;
                info!(owner = %owner, serial = %serial, "Adopted unknown trial item serial");
                Ok(SerialReconcile::Adopted(serial.clone()))
            }
            None => {
                let serial = Serial::generate();
                self.store
                    .save(owner, &TrialTimerRecord::granted(serial.clone(), self.duration_ms))?;
                info!(owner = %owner, serial = %serial, "Stamped serial on unmarked trial item");
                Ok(SerialReconcile::Stamp(serial))
            }
        }
    }

    /// Record a fresh grant and return its serial.
    ///
    /// # Errors
    /// Returns an I/O error if the record cannot be written.
    pub fn grant(&self, owner: &OwnerId) -> Result<Serial> {
        let serial = Serial::generate();
        self.store
            .save(owner, &TrialTimerRecord::granted(serial.clone(), self.duration_ms))?;
        Ok(serial)
    }

    /// Forget an owner's record and any open interval.
    ///
    /// # Errors
    /// Returns an I/O error if the record cannot be deleted.
    pub fn reset(&self, owner: &OwnerId) -> Result<bool> {
        self.active_since.remove(owner);
        self.store.reset(owner)
    }

    /// Forget every record and interval.
    ///
    /// # Errors
    /// Returns an I/O error if the directory cannot be listed.
    pub fn reset_all(&self) -> Result<usize> {
        self.active_since.clear();
        self.store.reset_all()
    }
}

/// Render a budget as `Xd Yh`, `Xh Ym` or `Xm Ys`.
#[must_use]
pub fn format_duration(ms: i64) -> String {
    let total_sec = ms.max(0) / 1000;
    let days = total_sec / 86_400;
    let hours = (total_sec % 86_400) / 3600;
    let mins = (total_sec % 3600) / 60;
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {mins}m")
    } else {
        format!("{mins}m {}s", total_sec % 60)
    }
}
