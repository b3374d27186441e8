use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use keyring::Entry;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::models::Credential;

/// Keychain service name
const SERVICE_NAME: &str = "transitpass";

/// Settings key the Authorization header is stored under
pub const AUTH_HEADER_KEY: &str = "auth_header";

/// Narrow durable key/value capability used for credential persistence.
pub trait PersistentKv: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;
}

// ============================================================================
// OS keychain
// ============================================================================

/// Stores values in the OS keychain via `keyring`.
pub struct KeyringKv {
    service: String,
}

impl KeyringKv {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key).context("Failed to create keyring entry")
    }
}

impl Default for KeyringKv {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistentKv for KeyringKv {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve value from keychain"),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .context("Failed to store value in keychain")?;

        // Read back through a fresh entry; a store without a real backend
        // accepts writes it never keeps.
        match self.get(key)? {
            Some(stored) if stored == value => Ok(()),
            _ => Err(anyhow::anyhow!(
                "Keychain did not retain the value for {}/{}",
                self.service,
                key
            )),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete value from keychain"),
        }
    }
}

// ============================================================================
// JSON file
// ============================================================================

/// Stores values in a single JSON object file.
pub struct FileKv {
    path: PathBuf,
    // Serializes read-modify-write within this process
    lock: Mutex<()>,
}

impl FileKv {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", self.path.display()))
    }

    fn write_all(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(values)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

impl PersistentKv for FileKv {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock();
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut values = self.read_all()?;
        values.insert(key.to_string(), value.to_string());
        self.write_all(&values)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut values = self.read_all()?;
        if values.remove(key).is_some() {
            self.write_all(&values)?;
        }
        Ok(())
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-local storage; nothing survives a restart.
#[derive(Default)]
pub struct MemoryKv {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistentKv for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.values.lock().remove(key);
        Ok(())
    }
}

// ============================================================================
// Credential store
// ============================================================================

/// Persists the session credential under [`AUTH_HEADER_KEY`].
#[derive(Clone)]
pub struct CredentialStore {
    kv: Arc<dyn PersistentKv>,
}

impl CredentialStore {
    pub fn new(kv: Arc<dyn PersistentKv>) -> Self {
        Self { kv }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKv::new()))
    }

    /// Load the stored credential. Unreadable or malformed values count as
    /// absent.
    pub fn load(&self) -> Option<Credential> {
        match self.kv.get(AUTH_HEADER_KEY) {
            Ok(Some(value)) => {
                let credential = Credential::from_header_value(&value);
                if credential.is_none() {
                    warn!("Stored credential is malformed, ignoring it");
                }
                credential
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read stored credential");
                None
            }
        }
    }

    pub fn save(&self, credential: &Credential) -> Result<()> {
        self.kv.set(AUTH_HEADER_KEY, &credential.header_value())?;
        debug!("Credential persisted");
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.kv.delete(AUTH_HEADER_KEY)?;
        debug!("Stored credential removed");
        Ok(())
    }

    /// Check if a credential is stored
    pub fn has_credential(&self) -> bool {
        self.load().is_some()
    }
}
