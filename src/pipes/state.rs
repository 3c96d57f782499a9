//! Data Store Persistence
//!
//! A [`StoreSnapshot`] captures every pipe, every bundle and the current
//! pipe pointer. Snapshots are written as pretty-printed JSON and restored
//! into an empty store.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Local};
use log::info;
use serde::{Deserialize, Serialize};

use super::container::PipeContainer;
use super::store::{DataStore, StoreInner};
use crate::error::{RelaxError, RelaxResult};

/// Snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Full, lossless copy of the data store contents.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StoreSnapshot {
    pub version: u32,

    /// When the snapshot was taken
    pub timestamp: DateTime<Local>,

    pub pipes: BTreeMap<String, PipeContainer>,

    /// Bundle name to member pipe names, in bundling order
    pub bundles: BTreeMap<String, Vec<String>>,

    pub current: Option<String>,
}

impl StoreSnapshot {
    /// Saves the snapshot to a file, creating parent directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> RelaxResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;

        info!("Saved the program state to {}", path.display());
        Ok(())
    }

    /// Loads a snapshot from a file.
    pub fn load(path: impl AsRef<Path>) -> RelaxResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let snapshot: StoreSnapshot = serde_json::from_str(&content)?;

        if snapshot.version > SNAPSHOT_VERSION {
            return Err(RelaxError::Config(format!(
                "The state file '{}' has format version {}, newer than the supported version {}",
                path.display(),
                snapshot.version,
                SNAPSHOT_VERSION
            )));
        }

        info!("Loaded the program state from {}", path.display());
        Ok(snapshot)
    }

    /// Checks the internal consistency of the snapshot.
    fn validate(&self) -> RelaxResult<()> {
        if let Some(current) = &self.current {
            if !self.pipes.contains_key(current) {
                return Err(RelaxError::NoPipe(Some(current.clone())));
            }
        }

        let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
        for (bundle, members) in &self.bundles {
            if members.is_empty() {
                return Err(RelaxError::Config(format!("The bundle '{}' is empty", bundle)));
            }
            for pipe in members {
                if !self.pipes.contains_key(pipe) {
                    return Err(RelaxError::NoPipe(Some(pipe.clone())));
                }
                if let Some(existing) = seen.insert(pipe, bundle) {
                    return Err(RelaxError::AlreadyBundled {
                        pipe: pipe.clone(),
                        bundle: existing.to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

impl DataStore {
    /// Takes a snapshot of the whole store.
    pub fn snapshot(&self) -> StoreSnapshot {
        let _lock = self.status().pipe_lock.acquire("snapshot");
        let inner = self.inner();

        StoreSnapshot {
            version: SNAPSHOT_VERSION,
            timestamp: Local::now(),
            pipes: inner.pipes.clone(),
            bundles: inner.bundles.clone(),
            current: inner.current.clone(),
        }
    }

    /// Restores a snapshot into this store.
    ///
    /// The store must be empty. On success `state_load` and then
    /// `pipe_alteration` are notified once each.
    pub fn restore(&self, snapshot: StoreSnapshot) -> RelaxResult<()> {
        snapshot.validate()?;

        {
            let _lock = self.status().pipe_lock.acquire("restore");
            let mut inner = self.inner();

            if !inner.pipes.is_empty() {
                return Err(RelaxError::NotEmpty(inner.pipes.len()));
            }

            *inner = StoreInner {
                pipes: snapshot.pipes,
                bundles: snapshot.bundles,
                current: snapshot.current,
            };
        }

        self.status().observers.state_load.notify()?;
        self.status().observers.pipe_alteration.notify()
    }

    /// Saves the store to a JSON state file.
    pub fn save_state(&self, path: impl AsRef<Path>) -> RelaxResult<()> {
        self.snapshot().save(path)
    }

    /// Loads a JSON state file into this (empty) store.
    pub fn load_state(&self, path: impl AsRef<Path>) -> RelaxResult<()> {
        self.restore(StoreSnapshot::load(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipes::container::SpinContainer;
    use crate::pipes::types::PipeType;
    use crate::status::Status;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn populated() -> Arc<DataStore> {
        let ds = DataStore::new(Status::for_tests());
        ds.create("base", "mf", Some("mf run"), true).unwrap();
        ds.create("noe", "noe", None, false).unwrap();
        ds.with_pipe_mut(Some("base"), |p| {
            p.set_global("field", 600.0);
            p.add_spin(SpinContainer::new(":3@N").with_param("s2", 0.85));
        })
        .unwrap();
        ds
    }

    #[test]
    fn test_snapshot_round_trip_through_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state/save.json");

        let ds = populated();
        ds.save_state(&path).unwrap();

        let restored = DataStore::new(Status::for_tests());
        restored.load_state(&path).unwrap();

        assert_eq!(restored.pipe_names(None), vec!["base", "noe"]);
        assert_eq!(restored.cdp_name(), Some("base".to_string()));
        assert_eq!(restored.get_bundle("base").unwrap(), Some("mf run".to_string()));
        assert_eq!(restored.get_type(Some("noe")).unwrap(), PipeType::Noe);
        assert_eq!(restored.get_pipe(Some("base")).unwrap(), ds.get_pipe(Some("base")).unwrap());
    }

    #[test]
    fn test_pipe_types_use_wire_names() {
        let json = serde_json::to_string(&populated().snapshot()).unwrap();
        assert!(json.contains("\"mf\""));
        assert!(json.contains("\"noe\""));
    }

    #[test]
    fn test_restore_requires_empty_store() {
        let ds = populated();
        let snapshot = ds.snapshot();

        let err = ds.restore(snapshot).unwrap_err();
        assert!(matches!(err, RelaxError::NotEmpty(2)));
    }

    #[test]
    fn test_restore_notifies() {
        let snapshot = populated().snapshot();
        let ds = DataStore::new(Status::for_tests());

        let loads = Arc::new(AtomicUsize::new(0));
        let alterations = Arc::new(AtomicUsize::new(0));
        let (l, a) = (Arc::clone(&loads), Arc::clone(&alterations));
        ds.status()
            .observers
            .state_load
            .register("counter", move || {
                l.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }, None)
            .unwrap();
        ds.status()
            .observers
            .pipe_alteration
            .register("counter", move || {
                a.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }, None)
            .unwrap();

        ds.restore(snapshot).unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(alterations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_inconsistent_snapshot_rejected() {
        let mut snapshot = populated().snapshot();
        snapshot.current = Some("ghost".to_string());

        let ds = DataStore::new(Status::for_tests());
        assert!(matches!(ds.restore(snapshot), Err(RelaxError::NoPipe(_))));
        assert!(ds.is_empty());

        let mut snapshot = populated().snapshot();
        snapshot
            .bundles
            .insert("other".to_string(), vec!["base".to_string()]);
        assert!(matches!(
            ds.restore(snapshot),
            Err(RelaxError::AlreadyBundled { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let err = StoreSnapshot::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, RelaxError::Io(_)));
    }

    #[test]
    fn test_load_newer_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("future.json");

        let mut snapshot = populated().snapshot();
        snapshot.version = SNAPSHOT_VERSION + 1;
        snapshot.save(&path).unwrap();

        assert!(matches!(StoreSnapshot::load(&path), Err(RelaxError::Config(_))));
    }
}
