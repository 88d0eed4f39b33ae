//! Hook registry
//!
//! Durable keyed storage for [`Hook`] records. The whole collection lives in
//! memory behind one read/write lock and is rewritten to a single JSON file on
//! every mutation. The file is only read at startup.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::logging::targets;
use super::error::HookError;
use super::model::Hook;

/// Thread-safe hook registry with file persistence
pub struct HookRegistry {
    hooks: RwLock<HashMap<String, Hook>>,
    /// `None` for in-memory registries
    storage_path: Option<PathBuf>,
}

impl HookRegistry {
    /// Open the registry backed by `path`.
    ///
    /// The parent directory is created if needed. A missing file starts an
    /// empty collection and is written immediately. An empty file is also an
    /// empty collection. A file that cannot be decoded is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, HookError> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    HookError::io(
                        format!("failed to create directory {}", parent.display()),
                        e,
                    )
                })?;
            }
        }

        let registry = if path.exists() {
            let hooks = load_hooks(&path)?;
            debug!(target: targets::HOOKS, path = %path.display(), count = hooks.len(), "loaded hook store");
            Self {
                hooks: RwLock::new(hooks),
                storage_path: Some(path),
            }
        } else {
            let registry = Self {
                hooks: RwLock::new(HashMap::new()),
                storage_path: Some(path),
            };
            registry.persist(&registry.hooks.read())?;
            registry
        };

        Ok(registry)
    }

    /// Create an in-memory only registry (for testing)
    pub fn in_memory() -> Self {
        Self {
            hooks: RwLock::new(HashMap::new()),
            storage_path: None,
        }
    }

    /// Path of the backing file, if any.
    pub fn storage_path(&self) -> Option<&Path> {
        self.storage_path.as_deref()
    }

    /// Get a snapshot of one hook.
    pub fn get_by_id(&self, id: &str) -> Result<Hook, HookError> {
        self.hooks
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| HookError::NotFound(id.to_string()))
    }

    /// Get snapshots of every hook. Order is unspecified.
    pub fn get_all(&self) -> Vec<Hook> {
        self.hooks.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.read().is_empty()
    }

    /// Insert a new hook, stamping both timestamps with the current time.
    pub fn create(&self, mut hook: Hook) -> Result<Hook, HookError> {
        let mut hooks = self.hooks.write();

        if hooks.contains_key(&hook.id) {
            return Err(HookError::AlreadyExists(hook.id));
        }

        let now = Utc::now();
        hook.created_at = now;
        hook.updated_at = now;
        hooks.insert(hook.id.clone(), hook.clone());

        if let Err(e) = self.persist(&hooks) {
            hooks.remove(&hook.id);
            return Err(e);
        }
        Ok(hook)
    }

    /// Replace an existing hook.
    ///
    /// `created_at` is carried over from the stored record and `updated_at` is
    /// refreshed; every other field comes from `hook`.
    pub fn update(&self, mut hook: Hook) -> Result<Hook, HookError> {
        let mut hooks = self.hooks.write();

        let previous = match hooks.get(&hook.id) {
            Some(existing) => existing.clone(),
            None => return Err(HookError::NotFound(hook.id)),
        };

        hook.created_at = previous.created_at;
        hook.updated_at = next_timestamp(previous.updated_at);
        hooks.insert(hook.id.clone(), hook.clone());

        if let Err(e) = self.persist(&hooks) {
            hooks.insert(previous.id.clone(), previous);
            return Err(e);
        }
        Ok(hook)
    }

    /// Remove a hook.
    pub fn delete(&self, id: &str) -> Result<(), HookError> {
        let mut hooks = self.hooks.write();

        let removed = match hooks.remove(id) {
            Some(hook) => hook,
            None => return Err(HookError::NotFound(id.to_string())),
        };

        if let Err(e) = self.persist(&hooks) {
            hooks.insert(removed.id.clone(), removed);
            return Err(e);
        }
        Ok(())
    }

    /// Write the collection to disk. Callers hold the lock.
    fn persist(&self, hooks: &HashMap<String, Hook>) -> Result<(), HookError> {
        let Some(path) = &self.storage_path else {
            return Ok(());
        };

        let mut list: Vec<&Hook> = hooks.values().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        let mut content = serde_json::to_string_pretty(&list)?;
        content.push('\n');

        write_atomic(path, content.as_bytes())
    }
}

/// A timestamp that is now, but never earlier than or equal to `previous`.
fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + Duration::nanoseconds(1)
    }
}

fn load_hooks(path: &Path) -> Result<HashMap<String, Hook>, HookError> {
    let content = fs::read_to_string(path).map_err(|e| {
        HookError::io(
            format!("failed to read hook store {}", path.display()),
            e,
        )
    })?;

    if content.trim().is_empty() {
        return Ok(HashMap::new());
    }

    let list: Vec<Hook> = serde_json::from_str(&content)?;
    let mut hooks = HashMap::with_capacity(list.len());
    for hook in list {
        if let Some(dup) = hooks.insert(hook.id.clone(), hook) {
            warn!(target: targets::HOOKS, id = %dup.id, "duplicate hook id in store, keeping the later entry");
        }
    }
    Ok(hooks)
}

/// Write to a sibling temp file, sync it, then rename it over `path`.
fn write_atomic(path: &Path, content: &[u8]) -> Result<(), HookError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                HookError::io(
                    format!("failed to create directory {}", parent.display()),
                    e,
                )
            })?;
        }
    }

    let mut tmp: OsString = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp_path = PathBuf::from(tmp);

    let write = || -> std::io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    };

    write().map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        HookError::io(
            format!("failed to write hook store {}", path.display()),
            e,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_hook(id: &str) -> Hook {
        Hook::new(id, format!("Hook {}", id), format!("{}/flag.txt", id)).with_token("secret")
    }

    #[test]
    fn test_create_and_get() {
        let registry = HookRegistry::in_memory();
        let created = registry.create(test_hook("ci")).unwrap();

        let fetched = registry.get_by_id("ci").unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.created_at, fetched.updated_at);
        assert!(fetched.created_at > DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(fetched.name, "Hook ci");
        assert_eq!(fetched.token, "secret");
    }

    #[test]
    fn test_create_duplicate_rejected() {
        let registry = HookRegistry::in_memory();
        registry.create(test_hook("ci")).unwrap();

        let mut other = test_hook("ci");
        other.name = "Impostor".to_string();
        let err = registry.create(other).unwrap_err();
        assert!(matches!(err, HookError::AlreadyExists(ref id) if id == "ci"));

        assert_eq!(registry.get_by_id("ci").unwrap().name, "Hook ci");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_missing() {
        let registry = HookRegistry::in_memory();
        assert!(matches!(
            registry.get_by_id("nope"),
            Err(HookError::NotFound(_))
        ));
    }

    #[test]
    fn test_update_refreshes_updated_at_only() {
        let registry = HookRegistry::in_memory();
        let created = registry.create(test_hook("ci")).unwrap();

        let mut changed = test_hook("ci");
        changed.enabled = false;
        changed.description = "paused".to_string();
        let updated = registry.update(changed).unwrap();

        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at > created.updated_at);
        assert!(!updated.enabled);
        assert_eq!(registry.get_by_id("ci").unwrap().description, "paused");
    }

    #[test]
    fn test_update_replaces_all_fields() {
        let registry = HookRegistry::in_memory();
        registry
            .create(test_hook("ci").with_description("keep me?"))
            .unwrap();

        registry.update(test_hook("ci")).unwrap();
        assert_eq!(registry.get_by_id("ci").unwrap().description, "");
    }

    #[test]
    fn test_update_missing() {
        let registry = HookRegistry::in_memory();
        assert!(matches!(
            registry.update(test_hook("ghost")),
            Err(HookError::NotFound(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_delete() {
        let registry = HookRegistry::in_memory();
        registry.create(test_hook("ci")).unwrap();

        registry.delete("ci").unwrap();
        assert!(matches!(registry.get_by_id("ci"), Err(HookError::NotFound(_))));
        assert!(matches!(registry.delete("ci"), Err(HookError::NotFound(_))));
    }

    #[test]
    fn test_returned_hooks_are_snapshots() {
        let registry = HookRegistry::in_memory();
        registry.create(test_hook("ci")).unwrap();

        let mut snapshot = registry.get_by_id("ci").unwrap();
        snapshot.token = "tampered".to_string();
        assert_eq!(registry.get_by_id("ci").unwrap().token, "secret");
    }

    #[test]
    fn test_get_all() {
        let registry = HookRegistry::in_memory();
        registry.create(test_hook("a")).unwrap();
        registry.create(test_hook("b")).unwrap();

        let mut ids: Vec<String> = registry.get_all().into_iter().map(|h| h.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_open_missing_file_creates_empty_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("hooks.json");

        let registry = HookRegistry::open(&path).unwrap();
        assert!(registry.is_empty());
        assert!(path.exists());

        let content = fs::read_to_string(&path).unwrap();
        let list: Vec<Hook> = serde_json::from_str(&content).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn test_open_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hooks.json");
        fs::write(&path, "").unwrap();

        let registry = HookRegistry::open(&path).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_open_corrupt_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hooks.json");
        fs::write(&path, "[{not json").unwrap();

        assert!(matches!(
            HookRegistry::open(&path),
            Err(HookError::Serialization(_))
        ));
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hooks.json");

        let created = {
            let registry = HookRegistry::open(&path).unwrap();
            registry.create(test_hook("b")).unwrap();
            registry.create(test_hook("a")).unwrap();
            registry.delete("b").unwrap();
            registry.get_by_id("a").unwrap()
        };

        let reopened = HookRegistry::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get_by_id("a").unwrap(), created);
    }

    #[test]
    fn test_store_file_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hooks.json");
        let registry = HookRegistry::open(&path).unwrap();
        registry.create(test_hook("ci")).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let entry = &value.as_array().unwrap()[0];
        for key in [
            "id",
            "name",
            "description",
            "token",
            "flag_file",
            "enabled",
            "created_at",
            "updated_at",
        ] {
            assert!(entry.get(key).is_some(), "missing {}", key);
        }
        assert!(!dir.path().join("hooks.json.tmp").exists());
    }

    #[test]
    fn test_duplicate_ids_in_file_last_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hooks.json");
        let first = test_hook("ci").with_description("first");
        let second = test_hook("ci").with_description("second");
        fs::write(&path, serde_json::to_string(&vec![first, second]).unwrap()).unwrap();

        let registry = HookRegistry::open(&path).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_by_id("ci").unwrap().description, "second");
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_flush_rolls_back() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store_dir = dir.path().join("store");
        let path = store_dir.join("hooks.json");
        let registry = HookRegistry::open(&path).unwrap();

        fs::set_permissions(&store_dir, fs::Permissions::from_mode(0o500)).unwrap();
        // Root ignores directory permissions; nothing to assert there
        let writable = File::create(store_dir.join("probe")).is_ok();
        let result = registry.create(test_hook("ci"));
        fs::set_permissions(&store_dir, fs::Permissions::from_mode(0o700)).unwrap();

        if writable {
            return;
        }
        assert!(matches!(result, Err(HookError::Io { .. })));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_next_timestamp_strictly_increases() {
        let future = Utc::now() + Duration::seconds(60);
        assert!(next_timestamp(future) > future);
    }

    #[test]
    fn test_concurrent_creates() {
        use std::sync::Arc;

        let dir = TempDir::new().unwrap();
        let registry = Arc::new(HookRegistry::open(dir.path().join("hooks.json")).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.create(test_hook(&format!("h{}", i))))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(registry.len(), 8);
        let reopened = HookRegistry::open(dir.path().join("hooks.json")).unwrap();
        assert_eq!(reopened.len(), 8);
    }
}
