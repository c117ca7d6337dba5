//! Slot directory store
//!
//! Slots live as directories directly under the data root, named
//! `<sanitized>-<yymmdd-HHMMSS>`. Reservation happens under a lock so
//! concurrent requests for the same name in the same second still get
//! distinct ids (a `-<n>` suffix breaks the tie). A slot disappears only
//! through an explicit delete.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::client::{DESC_MARKER, RUN_MARKER, sanitize_slot_name};
use crate::{Error, Result};

/// Timestamp suffix appended to requested names
const STAMP_FORMAT: &str = "%y%m%d-%H%M%S";

/// Store of slot directories under one root.
#[derive(Debug)]
pub struct SlotStore {
    root: PathBuf,
    reserve_lock: Mutex<()>,
}

impl SlotStore {
    /// Store rooted at `root`. The directory is created lazily on the
    /// first reservation.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            reserve_lock: Mutex::new(()),
        }
    }

    /// Root directory holding the slots.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Mint and reserve a uniquely named slot for `requested`.
    ///
    /// # Errors
    ///
    /// Returns an error when the name sanitizes to nothing or the
    /// directory cannot be created.
    pub fn reserve(&self, requested: &str) -> Result<String> {
        let name = sanitize_slot_name(requested);
        if name.is_empty() || name.chars().all(|c| c == '_') {
            return Err(Error::Agent(format!(
                "requested name {requested:?} sanitizes to nothing"
            )));
        }

        fs::create_dir_all(&self.root)?;
        let _guard = self
            .reserve_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let stamp = chrono::Local::now().format(STAMP_FORMAT);
        let base = format!("{name}-{stamp}");
        let mut candidate = base.clone();
        let mut tie = 1;
        loop {
            match fs::create_dir(self.root.join(&candidate)) {
                Ok(()) => {
                    tracing::info!(slot = %candidate, "slot reserved");
                    return Ok(candidate);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tie += 1;
                    candidate = format!("{base}-{tie}");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Existing slot ids, sorted by name for stable output.
    ///
    /// # Errors
    ///
    /// Returns an error when the root cannot be read; a missing root is
    /// an empty list.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut slots = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                slots.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        slots.sort();
        Ok(slots)
    }

    /// Resolve a slot id to its directory.
    ///
    /// # Errors
    ///
    /// Returns an error for ids that are not a plain path component or
    /// name no existing slot.
    pub fn slot_dir(&self, slot: &str) -> Result<PathBuf> {
        validate_slot_id(slot)?;
        let dir = self.root.join(slot);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(Error::Agent(format!("no such slot: {slot}")))
        }
    }

    /// Remove a slot and everything in it.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown slots or filesystem failures.
    pub fn delete(&self, slot: &str) -> Result<()> {
        let dir = self.slot_dir(slot)?;
        fs::remove_dir_all(dir)?;
        tracing::info!(slot, "slot deleted");
        Ok(())
    }

    /// First line of a slot's `.desc` marker, if present.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown slots or unreadable markers.
    pub fn description(&self, slot: &str) -> Result<Option<String>> {
        let dir = self.slot_dir(slot)?;
        first_line(&dir.join(DESC_MARKER))
    }

    /// Slot directory and the executable named by its `.run` marker.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown slots, a missing marker, or an empty
    /// executable name.
    pub fn run_target(&self, slot: &str) -> Result<(PathBuf, String)> {
        let dir = self.slot_dir(slot)?;
        let executable = first_line(&dir.join(RUN_MARKER))?
            .filter(|line| !line.is_empty())
            .ok_or_else(|| Error::Agent(format!("slot {slot} has no {RUN_MARKER} marker")))?;
        Ok((dir, executable))
    }
}

/// Slot ids travel inside URLs and become path components; reject
/// anything that could escape the data root.
pub(crate) fn validate_slot_id(slot: &str) -> Result<()> {
    if slot.is_empty()
        || slot == "."
        || slot.contains("..")
        || slot.contains(['/', '\\'])
        || slot.contains(char::is_control)
    {
        return Err(Error::Agent(format!("invalid slot id: {slot:?}")));
    }
    Ok(())
}

/// First line of a text file, trailing whitespace trimmed; `None` when
/// the file does not exist.
fn first_line(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(
            text.lines().next().unwrap_or_default().trim_end().to_string(),
        )),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
