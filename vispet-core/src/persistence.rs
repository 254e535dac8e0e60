//! Per-owner file persistence for companion inventories and trial timers.
//!
//! Two flat-file stores, one file per owner, named by the owner's UUID:
//!
//! ```text
//! <inventory_dir>/<owner>.csv          slot,itemId,quantity   (one line per occupied slot)
//! <trial_dir>/<owner>.properties       received=true
//!                                      remainingMs=255600000
//!                                      serial=5f0c…
//! ```
//!
//! A given owner's files are only touched by whichever thread currently
//! holds that owner's pending marker, so there is no file locking. Writes
//! go through a temp file in the same directory and an atomic rename, so a
//! crash mid-write leaves the previous version intact.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{Result, VisPetError};
use crate::types::{InventoryRecord, OwnerId, Serial};

// ---------------------------------------------------------------------------
// Atomic write helper
// ---------------------------------------------------------------------------

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| VisPetError::Io(e.error))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Inventory records
// ---------------------------------------------------------------------------

/// Render records as `slot,itemId,quantity` lines.
#[must_use]
pub fn format_inventory(records: &[InventoryRecord]) -> String {
    let mut out = String::new();
    for record in records {
        out.push_str(&format!("{},{},{}\n", record.slot, record.item_id, record.quantity));
    }
    out
}

/// Parse `slot,itemId,quantity` lines.
///
/// Malformed lines, slots at or beyond `capacity` and non-positive
/// quantities are skipped.
#[must_use]
pub fn parse_inventory(text: &str, capacity: u16) -> Vec<InventoryRecord> {
    let mut records = Vec::new();
    for (i, line) in text.lines().enumerate() {
        match parse_inventory_line(line) {
            Ok(record) if record.slot < capacity && record.quantity > 0 => records.push(record),
            Ok(record) => debug!(line = i + 1, slot = record.slot, "Skipping out-of-range inventory record"),
            Err(reason) => debug!(line = i + 1, %reason, "Skipping malformed inventory record"),
        }
    }
    records
}

fn parse_inventory_line(line: &str) -> std::result::Result<InventoryRecord, String> {
    let parts: Vec<&str> = line.trim().split(',').collect();
    let [slot, item_id, quantity] = parts.as_slice() else {
        return Err(format!("expected 3 fields, got {}", parts.len()));
    };
    let slot: u16 = slot.parse().map_err(|e| format!("bad slot: {e}"))?;
    let quantity: i64 = quantity.parse().map_err(|e| format!("bad quantity: {e}"))?;
    if item_id.is_empty() {
        return Err("empty item id".to_string());
    }
    Ok(InventoryRecord {
        slot,
        item_id: (*item_id).to_string(),
        quantity: u32::try_from(quantity.max(0)).unwrap_or(u32::MAX),
    })
}

// ---------------------------------------------------------------------------
// InventoryStore
// ---------------------------------------------------------------------------

/// Durable per-owner companion inventory.
#[derive(Debug, Clone)]
pub struct InventoryStore {
    dir: PathBuf,
}

impl InventoryStore {
    /// Open the store, creating `dir` if needed.
    ///
    /// # Errors
    /// Returns [`VisPetError::Io`] if the directory cannot be created.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        info!(path = %dir.display(), "Companion inventory store opened");
        Ok(Self { dir })
    }

    /// File backing an owner's inventory.
    #[must_use]
    pub fn path_for(&self, owner: &OwnerId) -> PathBuf {
        self.dir.join(format!("{owner}.csv"))
    }

    /// Overwrite an owner's saved inventory.
    ///
    /// # Errors
    /// Returns [`VisPetError::Io`] on write failure.
    pub fn save(&self, owner: &OwnerId, records: &[InventoryRecord]) -> Result<()> {
        let start = Instant::now();
        write_atomic(&self.path_for(owner), &format_inventory(records))?;
        debug!(
            owner = %owner,
            records = records.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Saved companion inventory"
        );
        Ok(())
    }

    /// Load an owner's saved inventory. A missing file is an empty inventory.
    ///
    /// # Errors
    /// Returns [`VisPetError::Io`] if the file exists but cannot be read.
    pub fn load(&self, owner: &OwnerId, capacity: u16) -> Result<Vec<InventoryRecord>> {
        let path = self.path_for(owner);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let records = parse_inventory(&text, capacity);
        debug!(owner = %owner, records = records.len(), "Loaded companion inventory");
        Ok(records)
    }

    /// Whether an inventory file exists for the owner.
    #[must_use]
    pub fn has_saved(&self, owner: &OwnerId) -> bool {
        self.path_for(owner).exists()
    }
}

// ---------------------------------------------------------------------------
// Trial timer records
// ---------------------------------------------------------------------------

/// Durable trial state for one owner.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrialTimerRecord {
    /// Whether a trial item was ever granted.
    pub received: bool,
    /// Active-time budget left, in milliseconds.
    pub remaining_ms: i64,
    /// Serial of the granted item copy.
    pub serial: Option<Serial>,
}

impl TrialTimerRecord {
    /// A fresh grant with the full budget.
    #[must_use]
    pub fn granted(serial: Serial, duration_ms: i64) -> Self {
        Self {
            received: true,
            remaining_ms: duration_ms,
            serial: Some(serial),
        }
    }

    /// Granted and out of time.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.received && self.remaining_ms <= 0
    }

    /// Render as a properties file.
    #[must_use]
    pub fn to_properties(&self) -> String {
        let mut out = String::from("#FreePet timer data\n");
        out.push_str(&format!("received={}\n", self.received));
        out.push_str(&format!("remainingMs={}\n", self.remaining_ms));
        if let Some(serial) = &self.serial {
            out.push_str(&format!("serial={}\n", escape_value(serial.as_str())));
        }
        out
    }

    /// Parse a properties file. Unknown keys are ignored, unparsable
    /// numbers read as zero, and a legacy absolute `expiresAt` is converted
    /// to a remaining budget relative to `now_ms`.
    #[must_use]
    pub fn from_properties(text: &str, now_ms: i64) -> Self {
        let mut record = Self::default();
        let mut expires_at: Option<i64> = None;
        for line in text.lines() {
            let line = line.trim_start();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let Some(split) = line.find(['=', ':']) else {
                continue;
            };
            let key = line[..split].trim();
            let value = unescape_value(line[split + 1..].trim());
            match key {
                "received" => record.received = value.eq_ignore_ascii_case("true"),
                "remainingMs" => record.remaining_ms = value.parse().unwrap_or(0),
                "serial" if !value.is_empty() => record.serial = Some(Serial(value)),
                "expiresAt" => expires_at = value.parse().ok(),
                _ => {}
            }
        }
        if record.remaining_ms == 0 {
            if let Some(expires_at) = expires_at.filter(|e| *e > 0) {
                record.remaining_ms = (expires_at - now_ms).max(0);
            }
        }
        record
    }
}

fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '=' | ':' | '#' | '!' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn unescape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// TrialStore
// ---------------------------------------------------------------------------

/// Durable per-owner trial timer records.
pub struct TrialStore {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TrialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrialStore")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl TrialStore {
    /// Open the store, creating `dir` if needed.
    ///
    /// # Errors
    /// Returns [`VisPetError::Io`] if the directory cannot be created.
    pub fn open<P: AsRef<Path>>(dir: P, clock: Arc<dyn Clock>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        info!(path = %dir.display(), "Trial timer store opened");
        Ok(Self { dir, clock })
    }

    /// File backing an owner's record.
    #[must_use]
    pub fn path_for(&self, owner: &OwnerId) -> PathBuf {
        self.dir.join(format!("{owner}.properties"))
    }

    /// Load an owner's record. A missing file is a default (never granted)
    /// record.
    ///
    /// # Errors
    /// Returns [`VisPetError::Io`] if the file exists but cannot be read.
    pub fn load(&self, owner: &OwnerId) -> Result<TrialTimerRecord> {
        match fs::read_to_string(self.path_for(owner)) {
            Ok(text) => Ok(TrialTimerRecord::from_properties(&text, self.clock.now_ms())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TrialTimerRecord::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite an owner's record.
    ///
    /// # Errors
    /// Returns [`VisPetError::Io`] on write failure.
    pub fn save(&self, owner: &OwnerId, record: &TrialTimerRecord) -> Result<()> {
        write_atomic(&self.path_for(owner), &record.to_properties())?;
        debug!(
            owner = %owner,
            remaining_ms = record.remaining_ms,
            "Saved trial timer record"
        );
        Ok(())
    }

    /// Delete an owner's record. Returns `true` if one existed.
    ///
    /// # Errors
    /// Returns [`VisPetError::Io`] on delete failure.
    pub fn reset(&self, owner: &OwnerId) -> Result<bool> {
        match fs::remove_file(self.path_for(owner)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every record. Returns how many were removed.
    ///
    /// # Errors
    /// Returns [`VisPetError::Io`] if the directory cannot be listed.
    pub fn reset_all(&self) -> Result<usize> {
        let mut count = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "properties") {
                match fs::remove_file(&path) {
                    Ok(()) => count += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "Could not delete trial record"),
                }
            }
        }
        info!(count, "Reset all trial timer records");
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
