//! Per-application WireGuard key cache
//!
//! Each application UUID gets its own key pair, reused until it is older than
//! the cache lifetime. Records are stored as JSON in a [`KeyStore`]:
//!
//! ```json
//! {"privateKey": "<base64>", "created": 1688997228000}
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sinfonia_proto::{Key, KeyPair};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default key lifetime
pub const DEFAULT_KEY_LIFETIME: Duration = Duration::hours(1);

/// Key store errors
#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Key store unavailable: {0}")]
    Unavailable(String),
}

/// Key-value storage for serialized key records
///
/// Implementations must make each single-key operation atomic. No
/// cross-key transactions are required.
pub trait KeyStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, KeyStoreError>;
    fn put(&self, key: &str, value: &str) -> Result<(), KeyStoreError>;
    fn remove(&self, key: &str) -> Result<(), KeyStoreError>;
}

/// In-process key store
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn get(&self, key: &str) -> Result<Option<String>, KeyStoreError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| KeyStoreError::Unavailable(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), KeyStoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| KeyStoreError::Unavailable(e.to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), KeyStoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| KeyStoreError::Unavailable(e.to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

/// Key store keeping one JSON file per application UUID
///
/// Files are written to a temporary name and renamed into place. On unix the
/// directory is created 0700 and each file 0600. Encryption at rest is left
/// to the filesystem.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    base_dir: PathBuf,
}

impl FileKeyStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, KeyStoreError> {
        let base_dir = base_dir.into();
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        std::os::unix::fs::DirBuilderExt::mode(&mut builder, 0o700);
        builder.create(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf, KeyStoreError> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(KeyStoreError::Unavailable(format!(
                "invalid entry name '{}'",
                key
            )));
        }
        Ok(self.base_dir.join(format!("{}.json", key)))
    }
}

impl KeyStore for FileKeyStore {
    fn get(&self, key: &str) -> Result<Option<String>, KeyStoreError> {
        let path = self.entry_path(key)?;
        match fs::read_to_string(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<(), KeyStoreError> {
        let path = self.entry_path(key)?;
        let tmp = path.with_extension("json.tmp");

        // A leftover temp file would keep its old mode
        match fs::remove_file(&tmp) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        std::os::unix::fs::OpenOptionsExt::mode(&mut options, 0o600);

        let mut file = options.open(&tmp)?;
        file.write_all(value.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), KeyStoreError> {
        let path = self.entry_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyRecord {
    #[serde(rename = "privateKey")]
    private_key: String,
    /// Creation time, epoch milliseconds
    created: i64,
}

/// Cache of per-application key pairs
#[derive(Clone)]
pub struct KeyCache {
    store: Arc<dyn KeyStore>,
    lifetime: Duration,
}

impl KeyCache {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self {
            store,
            lifetime: DEFAULT_KEY_LIFETIME,
        }
    }

    /// Cache backed by process memory only
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKeyStore::new()))
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Key pair for an application
    ///
    /// Always returns a usable pair. When the fresh pair cannot be saved, an
    /// unsaved ephemeral pair is returned instead.
    pub fn get_keys(&self, uuid: &Uuid) -> KeyPair {
        self.get_keys_at(uuid, Utc::now())
    }

    pub(crate) fn get_keys_at(&self, uuid: &Uuid, now: DateTime<Utc>) -> KeyPair {
        let id = uuid.to_string();

        let record = match self.store.get(&id) {
            Ok(Some(data)) => match serde_json::from_str::<KeyRecord>(&data) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Discarding unreadable key record for {}: {}", id, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Key store lookup failed for {}: {}", id, e);
                None
            }
        };

        let Some(record) = record else {
            debug!("Key cache miss for {}", id);
            return self.issue(&id, now);
        };

        let created = DateTime::<Utc>::from_timestamp_millis(record.created);
        let fresh = created.is_some_and(|created| now - created < self.lifetime);
        if !fresh {
            debug!("Key cache stale for {}", id);
            return self.issue(&id, now);
        }

        match Key::from_base64(&record.private_key) {
            Ok(private_key) => {
                debug!("Key cache hit for {}", id);
                KeyPair::from_private_key(private_key)
            }
            Err(e) => {
                warn!("Discarding malformed private key for {}: {}", id, e);
                self.issue(&id, now)
            }
        }
    }

    /// Forget the key pair of an application
    pub fn clear_keys(&self, uuid: &Uuid) -> bool {
        match self.store.remove(&uuid.to_string()) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to clear keys for {}: {}", uuid, e);
                false
            }
        }
    }

    fn issue(&self, id: &str, now: DateTime<Utc>) -> KeyPair {
        let pair = KeyPair::generate();
        let record = KeyRecord {
            private_key: pair.private_key().to_base64(),
            created: now.timestamp_millis(),
        };

        let saved = serde_json::to_string(&record)
            .map_err(|e| KeyStoreError::Unavailable(e.to_string()))
            .and_then(|data| self.store.put(id, &data));

        match saved {
            Ok(()) => pair,
            Err(e) => {
                warn!("Failed to save keys for {}, using ephemeral pair: {}", id, e);
                KeyPair::generate()
            }
        }
    }
}

impl std::fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCache")
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ReadOnlyStore;

    impl KeyStore for ReadOnlyStore {
        fn get(&self, _key: &str) -> Result<Option<String>, KeyStoreError> {
            Ok(None)
        }

        fn put(&self, _key: &str, _value: &str) -> Result<(), KeyStoreError> {
            Err(KeyStoreError::Unavailable("read-only".to_string()))
        }

        fn remove(&self, _key: &str) -> Result<(), KeyStoreError> {
            Err(KeyStoreError::Unavailable("read-only".to_string()))
        }
    }

    #[test]
    fn test_same_keys_within_lifetime() {
        let cache = KeyCache::in_memory();
        let uuid = Uuid::new_v4();
        let now = Utc::now();

        let first = cache.get_keys_at(&uuid, now);
        let second = cache.get_keys_at(&uuid, now + Duration::minutes(59));

        assert_eq!(first, second);
    }

    #[test]
    fn test_new_keys_after_lifetime() {
        let cache = KeyCache::in_memory();
        let uuid = Uuid::new_v4();
        let now = Utc::now();

        let first = cache.get_keys_at(&uuid, now);
        let second = cache.get_keys_at(&uuid, now + Duration::hours(1));

        assert_ne!(first, second);

        // The replacement is cached in turn
        let third = cache.get_keys_at(&uuid, now + Duration::minutes(90));
        assert_eq!(second, third);
    }

    #[test]
    fn test_keys_are_per_application() {
        let cache = KeyCache::in_memory();
        let a = cache.get_keys(&Uuid::new_v4());
        let b = cache.get_keys(&Uuid::new_v4());
        assert_ne!(a, b);
    }

    #[test]
    fn test_custom_lifetime() {
        let cache = KeyCache::in_memory().with_lifetime(Duration::seconds(10));
        let uuid = Uuid::new_v4();
        let now = Utc::now();

        let first = cache.get_keys_at(&uuid, now);
        let second = cache.get_keys_at(&uuid, now + Duration::seconds(11));
        assert_ne!(first, second);
    }

    #[test]
    fn test_clear_keys() {
        let cache = KeyCache::in_memory();
        let uuid = Uuid::new_v4();

        let first = cache.get_keys(&uuid);
        assert!(cache.clear_keys(&uuid));
        let second = cache.get_keys(&uuid);

        assert_ne!(first, second);
    }

    #[test]
    fn test_save_failure_still_returns_keys() {
        let cache = KeyCache::new(Arc::new(ReadOnlyStore));
        let uuid = Uuid::new_v4();

        let pair = cache.get_keys(&uuid);
        assert_eq!(KeyPair::from_private_key(*pair.private_key()), pair);
        assert!(!cache.clear_keys(&uuid));
    }

    #[test]
    fn test_corrupt_record_is_replaced() {
        let store = Arc::new(MemoryKeyStore::new());
        let uuid = Uuid::new_v4();
        store.put(&uuid.to_string(), "{not json").unwrap();

        let cache = KeyCache::new(store.clone());
        let pair = cache.get_keys(&uuid);

        let saved = store.get(&uuid.to_string()).unwrap().unwrap();
        assert!(saved.contains(&pair.private_key().to_base64()));
    }

    #[test]
    fn test_record_format() {
        let store = Arc::new(MemoryKeyStore::new());
        let cache = KeyCache::new(store.clone());
        let uuid = Uuid::nil();
        let now = Utc::now();

        let pair = cache.get_keys_at(&uuid, now);
        let saved = store
            .get("00000000-0000-0000-0000-000000000000")
            .unwrap()
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&saved).unwrap();

        assert_eq!(json["privateKey"], pair.private_key().to_base64());
        assert_eq!(json["created"], now.timestamp_millis());
    }

    #[test]
    fn test_file_store_survives_new_cache() {
        let dir = tempfile::tempdir().unwrap();
        let uuid = Uuid::new_v4();

        let first = {
            let store = FileKeyStore::new(dir.path().join("keys")).unwrap();
            KeyCache::new(Arc::new(store)).get_keys(&uuid)
        };

        let store = FileKeyStore::new(dir.path().join("keys")).unwrap();
        let second = KeyCache::new(Arc::new(store)).get_keys(&uuid);

        assert_eq!(first, second);
        assert!(dir
            .path()
            .join("keys")
            .join(format!("{}.json", uuid))
            .exists());
    }

    #[test]
    fn test_file_store_rejects_path_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path()).unwrap();

        assert!(store.put("../escape", "x").is_err());
        assert!(store.get("").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let keys = dir.path().join("keys");
        let uuid = Uuid::new_v4();
        KeyCache::new(Arc::new(FileKeyStore::new(&keys).unwrap())).get_keys(&uuid);

        let dir_mode = fs::metadata(&keys).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o077, 0, "key directory mode {:o}", dir_mode);

        let file = keys.join(format!("{}.json", uuid));
        let file_mode = fs::metadata(&file).unwrap().permissions().mode();
        assert_eq!(file_mode & 0o077, 0, "key file mode {:o}", file_mode);
    }

    #[test]
    fn test_file_store_remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path()).unwrap();
        assert!(store.remove("00000000-0000-0000-0000-000000000000").is_ok());
    }
}
