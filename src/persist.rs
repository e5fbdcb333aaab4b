//! Registry snapshot storage.
//!
//! The engine writes snapshots through [`SnapshotStore`] after a debounce
//! delay, so bursts of changes coalesce into one write. An unreadable or
//! unparsable snapshot is treated as no snapshot at all.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::registry::RegistrySnapshot;

/// Default delay between a change and the snapshot write.
pub const DEFAULT_SAVE_DEBOUNCE: Duration = Duration::from_secs(120);

/// Delay used when verbose diagnostics are on.
pub const VERBOSE_SAVE_DEBOUNCE: Duration = Duration::from_secs(1);

/// Loads and saves registry snapshots.
pub trait SnapshotStore: Send {
    /// Returns the stored snapshot, or `None` if there is none.
    fn load(&mut self) -> Result<Option<RegistrySnapshot>>;

    /// Replaces the stored snapshot.
    fn save(&mut self, snapshot: &RegistrySnapshot) -> Result<()>;
}

/// Serializes a snapshot in its stored text form.
pub fn to_json(snapshot: &RegistrySnapshot) -> Result<String> {
    let mut text = serde_json::to_string_pretty(snapshot)?;
    text.push('\n');
    Ok(text)
}

fn from_json(text: &str, origin: &str) -> Option<RegistrySnapshot> {
    // Guard against leading NULs left by an interrupted write.
    let text = text.trim_start_matches('\0');
    if text.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(text) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            tracing::warn!("ignoring unparsable snapshot {}: {}", origin, e);
            None
        }
    }
}

/// Pretty-printed JSON file, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_temp(&self, dir: &Path, content: &str) -> io::Result<PathBuf> {
        let base = self
            .path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("registry.json");
        let mut counter = 0u32;
        loop {
            let candidate = dir.join(format!(".{base}.tmp-{}-{counter}", std::process::id()));
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
            {
                Ok(mut file) => {
                    let written = file
                        .write_all(content.as_bytes())
                        .and_then(|()| file.flush())
                        .and_then(|()| file.sync_all());
                    if let Err(e) = written {
                        let _ = fs::remove_file(&candidate);
                        return Err(e);
                    }
                    return Ok(candidate);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    counter = counter.saturating_add(1);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl SnapshotStore for JsonFileStore {
    fn load(&mut self) -> Result<Option<RegistrySnapshot>> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(from_json(&text, &self.path.display().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                tracing::warn!("cannot read snapshot {}: {}", self.path.display(), e);
                Ok(None)
            }
        }
    }

    fn save(&mut self, snapshot: &RegistrySnapshot) -> Result<()> {
        let content = to_json(snapshot)?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let temp = self.write_temp(&dir, &content)?;
        if let Err(e) = fs::rename(&temp, &self.path) {
            let _ = fs::remove_file(&temp);
            return Err(Error::Io(e));
        }
        tracing::debug!(
            "saved snapshot of {} nodes to {}",
            snapshot.nodes.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// In-memory store; clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    contents: Arc<Mutex<Option<String>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `text` as its stored form.
    #[must_use]
    pub fn with_contents(text: impl Into<String>) -> Self {
        Self {
            contents: Arc::new(Mutex::new(Some(text.into()))),
        }
    }

    /// The stored text, if anything was saved.
    #[must_use]
    pub fn contents(&self) -> Option<String> {
        self.contents.lock().ok().and_then(|c| c.clone())
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&mut self) -> Result<Option<RegistrySnapshot>> {
        Ok(self
            .contents()
            .and_then(|text| from_json(&text, "in memory")))
    }

    fn save(&mut self, snapshot: &RegistrySnapshot) -> Result<()> {
        let text = to_json(snapshot)?;
        let mut contents = self
            .contents
            .lock()
            .map_err(|_| Error::Io(io::Error::other("snapshot store lock poisoned")))?;
        *contents = Some(text);
        Ok(())
    }
}

/// Coalesces save requests into one write per delay.
#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    due: Option<Instant>,
}

impl Debouncer {
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay, due: None }
    }

    /// Requests a save; an already scheduled save is not pushed back.
    pub fn schedule(&mut self, now: Instant) {
        if self.due.is_none() {
            self.due = Some(now + self.delay);
        }
    }

    /// When the pending save is due.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.due
    }

    /// Returns true and clears the request if the save is due.
    pub fn take_due(&mut self, now: Instant) -> bool {
        if self.due.is_some_and(|due| due <= now) {
            self.due = None;
            true
        } else {
            false
        }
    }

    /// Returns true and clears the request if a save is pending at all.
    pub const fn take_pending(&mut self) -> bool {
        self.due.take().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{NetworkAddress16, NetworkAddress64};
    use crate::registry::Registry;

    fn snapshot() -> RegistrySnapshot {
        let mut registry = Registry::new();
        registry.get_or_insert(NetworkAddress64::new(0x42), NetworkAddress16::new(0x1234));
        registry.snapshot()
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::new(dir.path().join("state").join("registry.json"));
        assert!(store.load().unwrap().is_none());

        store.save(&snapshot()).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, snapshot());

        let text = fs::read_to_string(store.path()).unwrap();
        assert!(text.contains("\"0000000000000042\""));
        // No temp files left behind.
        assert_eq!(fs::read_dir(dir.path().join("state")).unwrap().count(), 1);
    }

    #[test]
    fn test_failed_save_reports_error_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory where the snapshot file should go.
        let target = dir.path().join("registry.json");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep"), "x").unwrap();

        let mut store = JsonFileStore::new(target.clone());
        assert!(matches!(store.save(&snapshot()), Err(Error::Io(_))));
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["registry.json".to_owned()]);
    }

    #[test]
    fn test_unparsable_file_is_no_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        fs::write(&path, "{ not json").unwrap();
        let mut store = JsonFileStore::new(path);
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_memory_store_shares_contents() {
        let store = MemoryStore::new();
        let mut writer = store.clone();
        writer.save(&snapshot()).unwrap();
        assert_eq!(store.contents().unwrap(), to_json(&snapshot()).unwrap());

        let mut garbage = MemoryStore::with_contents("[1, 2");
        assert!(garbage.load().unwrap().is_none());
    }

    #[test]
    fn test_debouncer_coalesces() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(DEFAULT_SAVE_DEBOUNCE);
        debouncer.schedule(start);
        debouncer.schedule(start + Duration::from_secs(60));
        assert_eq!(debouncer.deadline(), Some(start + DEFAULT_SAVE_DEBOUNCE));
        assert!(!debouncer.take_due(start + Duration::from_secs(119)));
        assert!(debouncer.take_due(start + DEFAULT_SAVE_DEBOUNCE));
        assert!(debouncer.deadline().is_none());
        assert!(!debouncer.take_pending());
    }
}
