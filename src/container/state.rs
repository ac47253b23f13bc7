//! Durable record of running containers
//!
//! One JSON document per running container, `<dir>/<name>.json`. Records are
//! published with a no-clobber atomic link and withdrawn with an atomic
//! rename, so a reader always sees a whole record or none, and the store never
//! holds two records for one name. Insertion order comes from a counter in
//! `<dir>/.sequence`, not from the wall clock.

use crate::error::{RamaError, Result};
use crate::runtime::ProcessHandle;
use crate::storage::{fs as store_fs, validate_name, KeyLocks};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const RECORD_EXT: &str = "json";
const SEQUENCE_FILE: &str = ".sequence";
const LOCKS_DIR: &str = ".locks";
/// Not a valid container name, so it never collides with one
const SEQUENCE_LOCK: &str = ".sequence";

/// A running container and the process supervising it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Container name
    pub name: String,
    /// Image the container was started from
    pub image: String,
    /// Supervised process
    pub handle: ProcessHandle,
    /// When the record was inserted
    pub inserted_at: DateTime<Utc>,
    /// Position in insertion order
    #[serde(default)]
    pub seq: u64,
}

/// Store of [`StateRecord`]s keyed by container name
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
    locks: KeyLocks,
}

impl StateStore {
    /// Open (and create if needed) a state directory
    pub fn open(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        let locks = KeyLocks::new(dir.join(LOCKS_DIR))?;
        Ok(Self { dir, locks })
    }

    /// Take the next insertion sequence number
    fn next_seq(&self) -> Result<u64> {
        let _lock = self.locks.acquire(SEQUENCE_LOCK)?;
        let path = self.dir.join(SEQUENCE_FILE);

        let last = match fs::read_to_string(&path) {
            Ok(text) => match text.trim().parse::<u64>() {
                Ok(last) => last,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable sequence counter, rebuilding");
                    self.highest_seq()?
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => self.highest_seq()?,
            Err(e) => return Err(e.into()),
        };

        let next = last + 1;
        store_fs::publish_replace(&path, next.to_string().as_bytes())?;
        Ok(next)
    }

    /// Highest sequence number among readable records
    fn highest_seq(&self) -> Result<u64> {
        let mut highest = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(name) = record_name(&path) else {
                continue;
            };
            if let Ok(record) = self.read_record(&name, &path) {
                highest = highest.max(record.seq);
            }
        }
        Ok(highest)
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, RECORD_EXT))
    }

    /// Record that `name` is running under `handle`. Fails with
    /// `ContainerExists` if `name` already has a record.
    pub fn insert(&self, name: &str, image: &str, handle: ProcessHandle) -> Result<StateRecord> {
        validate_name(name)?;
        let record = StateRecord {
            name: name.to_string(),
            image: image.to_string(),
            handle,
            inserted_at: Utc::now(),
            seq: self.next_seq()?,
        };

        let data = serde_json::to_vec_pretty(&record)?;
        match store_fs::publish_new(&self.record_path(name), &data) {
            Ok(()) => {
                debug!(container = name, %handle, "state record inserted");
                Ok(record)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(RamaError::ContainerExists(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the record for `name`. Fails with `ContainerNotFound` if there is
    /// none. The record is not parsed, so corrupt records can be removed.
    pub fn remove(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        match store_fs::remove_file_atomic(&self.record_path(name)) {
            Ok(()) => {
                debug!(container = name, "state record removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(RamaError::ContainerNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch the record for `name`
    pub fn lookup(&self, name: &str) -> Result<StateRecord> {
        validate_name(name)?;
        self.read_record(name, &self.record_path(name))
    }

    /// True if `name` has a record (corrupt or not)
    pub fn contains(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        Ok(self.record_path(name).exists())
    }

    /// All records in insertion order
    pub fn list_all(&self) -> Result<Vec<StateRecord>> {
        let mut records = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = record_name(&path) else {
                continue;
            };

            match self.read_record(&name, &path) {
                Ok(record) => records.push(record),
                // Withdrawn between read_dir and read
                Err(RamaError::ContainerNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        records.sort_by(|a, b| a.seq.cmp(&b.seq).then_with(|| a.name.cmp(&b.name)));
        Ok(records)
    }

    fn read_record(&self, name: &str, path: &Path) -> Result<StateRecord> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(RamaError::ContainerNotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let record: StateRecord =
            serde_json::from_slice(&data).map_err(|e| RamaError::StateCorruption {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        if record.name != name {
            return Err(RamaError::StateCorruption {
                name: name.to_string(),
                reason: format!("record names container {:?}", record.name),
            });
        }

        Ok(record)
    }
}

/// Container name of a visible record file, if `path` is one
fn record_name(path: &Path) -> Option<String> {
    if path.extension()?.to_str()? != RECORD_EXT {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.starts_with('.') {
        return None;
    }
    Some(stem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::tempdir;

    fn handle(pid: u32) -> ProcessHandle {
        ProcessHandle {
            pid,
            start_time: 1000 + pid as u64,
        }
    }

    #[test]
    fn test_insert_lookup_remove() {
        let temp = tempdir().unwrap();
        let store = StateStore::open(temp.path().join("state")).unwrap();

        let record = store.insert("c1", "web", handle(10)).unwrap();
        assert_eq!(store.lookup("c1").unwrap(), record);
        assert!(store.contains("c1").unwrap());

        store.remove("c1").unwrap();
        assert!(matches!(
            store.lookup("c1"),
            Err(RamaError::ContainerNotFound(_))
        ));
        assert!(!store.contains("c1").unwrap());
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let temp = tempdir().unwrap();
        let store = StateStore::open(temp.path().to_path_buf()).unwrap();

        store.insert("c1", "web", handle(10)).unwrap();
        let err = store.insert("c1", "web", handle(11)).unwrap_err();
        assert!(matches!(err, RamaError::ContainerExists(_)));
        assert_eq!(store.lookup("c1").unwrap().handle, handle(10));
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_missing() {
        let temp = tempdir().unwrap();
        let store = StateStore::open(temp.path().to_path_buf()).unwrap();
        assert!(matches!(
            store.remove("ghost"),
            Err(RamaError::ContainerNotFound(_))
        ));
    }

    #[test]
    fn test_list_in_insertion_order() {
        let temp = tempdir().unwrap();
        let store = StateStore::open(temp.path().to_path_buf()).unwrap();

        for (i, name) in ["zeta", "alpha", "mid"].iter().enumerate() {
            store.insert(name, "web", handle(i as u32 + 1)).unwrap();
        }

        let names: Vec<String> = store.list_all().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_order_ignores_wall_clock() {
        let temp = tempdir().unwrap();
        let store = StateStore::open(temp.path().to_path_buf()).unwrap();
        store.insert("first", "web", handle(1)).unwrap();
        let mut second = store.insert("second", "web", handle(2)).unwrap();

        // As if the clock stepped back between the two inserts
        second.inserted_at = Utc.timestamp_opt(0, 0).unwrap();
        fs::write(
            temp.path().join("second.json"),
            serde_json::to_vec(&second).unwrap(),
        )
        .unwrap();

        let names: Vec<String> = store.list_all().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_sequence_survives_removal_and_counter_loss() {
        let temp = tempdir().unwrap();
        let store = StateStore::open(temp.path().to_path_buf()).unwrap();
        let a = store.insert("a", "web", handle(1)).unwrap();
        let b = store.insert("b", "web", handle(2)).unwrap();
        assert!(b.seq > a.seq);

        store.remove("b").unwrap();
        let c = store.insert("c", "web", handle(3)).unwrap();
        assert!(c.seq > b.seq);

        fs::remove_file(temp.path().join(SEQUENCE_FILE)).unwrap();
        let d = store.insert("d", "web", handle(4)).unwrap();
        assert!(d.seq > c.seq);
    }

    #[test]
    fn test_list_ignores_temporary_files() {
        let temp = tempdir().unwrap();
        let store = StateStore::open(temp.path().to_path_buf()).unwrap();
        store.insert("c1", "web", handle(1)).unwrap();
        fs::write(temp.path().join(".tmpXYZ"), b"partial").unwrap();
        fs::write(temp.path().join(".removed-abc.json"), b"{").unwrap();

        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_record_is_reported_and_removable() {
        let temp = tempdir().unwrap();
        let store = StateStore::open(temp.path().to_path_buf()).unwrap();
        fs::write(temp.path().join("broken.json"), b"{\"name\": ").unwrap();

        let err = store.lookup("broken").unwrap_err();
        assert!(matches!(err, RamaError::StateCorruption { .. }));
        assert!(matches!(
            store.list_all(),
            Err(RamaError::StateCorruption { .. })
        ));

        store.remove("broken").unwrap();
        assert!(store.list_all().unwrap().is_empty());
    }

    #[test]
    fn test_mismatched_record_name_is_corruption() {
        let temp = tempdir().unwrap();
        let store = StateStore::open(temp.path().to_path_buf()).unwrap();
        store.insert("c1", "web", handle(1)).unwrap();
        fs::copy(temp.path().join("c1.json"), temp.path().join("c2.json")).unwrap();

        assert!(matches!(
            store.lookup("c2"),
            Err(RamaError::StateCorruption { .. })
        ));
    }

    #[test]
    fn test_concurrent_inserts_have_one_winner() {
        let temp = tempdir().unwrap();
        let store = Arc::new(StateStore::open(temp.path().to_path_buf()).unwrap());
        let barrier = Arc::new(Barrier::new(8));

        let workers: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    store.insert("shared", "web", handle(i + 1)).is_ok()
                })
            })
            .collect();

        let winners = workers
            .into_iter()
            .map(|w| w.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_removes_have_one_winner() {
        let temp = tempdir().unwrap();
        let store = Arc::new(StateStore::open(temp.path().to_path_buf()).unwrap());
        store.insert("c1", "web", handle(1)).unwrap();
        let barrier = Arc::new(Barrier::new(4));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    store.remove("c1")
                })
            })
            .collect();

        let results: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| e.is_not_found()));
    }
}
