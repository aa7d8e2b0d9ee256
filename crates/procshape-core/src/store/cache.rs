//! Fingerprinted cache of last-seen modification ticks.
//!
//! One JSON file per fingerprint under the cache directory. The cache is an
//! optimization only: every read or write problem degrades to a cold cache
//! and is logged, never returned.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::errors::ProcShapeResult;
use crate::models::CacheSnapshot;

/// Stable project fingerprint: SHA-256 over the normalized identity, schema
/// scope and object count, first 16 hex characters.
pub fn compute_fingerprint(identity: &str, schemas: &[String], object_count: usize) -> String {
    let mut normalized: Vec<String> = schemas
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    normalized.sort();
    normalized.dedup();

    let input = format!(
        "{}|{}|{}",
        identity.trim().to_lowercase(),
        normalized.join(","),
        object_count
    );
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

#[derive(Clone, Debug)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{fingerprint}.json"))
    }

    /// Load the snapshot for `fingerprint`. Missing, unreadable or foreign
    /// files all read as a cold cache.
    pub fn load(&self, fingerprint: &str) -> Option<CacheSnapshot> {
        let path = self.path_for(fingerprint);
        if !path.is_file() {
            debug!("No cache file at {}", path.display());
            return None;
        }
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to read cache file {}: {e}", path.display());
                return None;
            }
        };
        let snapshot: CacheSnapshot = match serde_json::from_str(&raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Ignoring corrupt cache file {}: {e}", path.display());
                return None;
            }
        };
        if snapshot.fingerprint != fingerprint {
            warn!(
                "Cache file {} belongs to fingerprint {}, treating as cold",
                path.display(),
                snapshot.fingerprint
            );
            return None;
        }
        Some(snapshot)
    }

    /// Persist `snapshot` under `fingerprint`. Returns whether the file was written.
    pub fn save(&self, fingerprint: &str, snapshot: &CacheSnapshot) -> bool {
        let mut snapshot = snapshot.clone();
        snapshot.fingerprint = fingerprint.to_string();
        snapshot.sort_entries();
        match self.write(fingerprint, &snapshot) {
            Ok(()) => {
                debug!(
                    "Saved {} cache entries for fingerprint {fingerprint}",
                    snapshot.entries.len()
                );
                true
            }
            Err(e) => {
                warn!("Failed to write cache for fingerprint {fingerprint}: {e}");
                false
            }
        }
    }

    fn write(&self, fingerprint: &str, snapshot: &CacheSnapshot) -> ProcShapeResult<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(fingerprint);
        let tmp = self.dir.join(format!("{fingerprint}.json.tmp"));
        let body = serde_json::to_string_pretty(snapshot)?;
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Delete the cache file of `fingerprint`, if any.
    pub fn clear(&self, fingerprint: &str) -> bool {
        let path = self.path_for(fingerprint);
        match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!("Failed to remove cache file {}: {e}", path.display());
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CacheEntry;
    use std::collections::BTreeMap;

    fn entry(schema: &str, name: &str, ticks: i64) -> CacheEntry {
        CacheEntry {
            schema: schema.into(),
            name: name.into(),
            modified_ticks: ticks,
        }
    }

    #[test]
    fn fingerprint_is_normalized_and_short() {
        let a = compute_fingerprint("Acme", &["Sales".into(), "dbo".into()], 12);
        let b = compute_fingerprint(" acme ", &["DBO".into(), "sales".into(), "sales".into()], 12);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, compute_fingerprint("Acme", &["dbo".into()], 12));
        assert_ne!(a, compute_fingerprint("Acme", &["Sales".into(), "dbo".into()], 13));
    }

    #[test]
    fn save_then_load_round_trips_ticks() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(tmp.path().join("cache"));
        let snapshot = CacheSnapshot::new(
            "abc",
            vec![entry("sales", "B", 2), entry("dbo", "A", 1)],
        );
        assert!(store.save("abc", &snapshot));

        let loaded = store.load("abc").unwrap();
        let ticks: BTreeMap<_, _> = loaded
            .entries
            .iter()
            .map(|e| ((e.schema.clone(), e.name.clone()), e.modified_ticks))
            .collect();
        let expected: BTreeMap<_, _> = snapshot
            .entries
            .iter()
            .map(|e| ((e.schema.clone(), e.name.clone()), e.modified_ticks))
            .collect();
        assert_eq!(ticks, expected);
        assert!(!store.dir().join("abc.json.tmp").exists());
    }

    #[test]
    fn written_file_uses_camel_case_and_sorted_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(tmp.path());
        let mut snapshot = CacheSnapshot::new("fp", vec![]);
        snapshot.entries = vec![entry("sales", "z", 1), entry("Dbo", "b", 2), entry("dbo", "A", 3)];
        store.save("fp", &snapshot);

        let raw = fs::read_to_string(store.path_for("fp")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(json.get("createdUtc").is_some());
        let names: Vec<_> = json["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["A", "b", "z"]);
        assert_eq!(json["entries"][0]["modifiedTicks"], 3);
    }

    #[test]
    fn missing_corrupt_or_foreign_files_are_cold() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(tmp.path());
        assert!(store.load("nope").is_none());

        fs::write(store.path_for("bad"), "{ not json").unwrap();
        assert!(store.load("bad").is_none());

        let foreign = CacheSnapshot::new("other", vec![entry("dbo", "A", 1)]);
        fs::write(
            store.path_for("mine"),
            serde_json::to_string(&foreign).unwrap(),
        )
        .unwrap();
        assert!(store.load("mine").is_none());
    }

    #[test]
    fn clear_removes_the_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheStore::new(tmp.path());
        store.save("fp", &CacheSnapshot::new("fp", vec![]));
        assert!(store.clear("fp"));
        assert!(!store.clear("fp"));
        assert!(store.load("fp").is_none());
    }

    #[test]
    fn unwritable_directory_is_swallowed() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("file");
        fs::write(&blocker, "x").unwrap();
        let store = CacheStore::new(blocker.join("cache"));
        assert!(!store.save("fp", &CacheSnapshot::new("fp", vec![])));
    }
}
