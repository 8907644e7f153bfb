use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use argon2::Argon2;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use keyring::Entry;
use rand::{rngs::OsRng, RngCore};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::utils::{remove_if_exists, write_atomic};

/// Key length in bytes (256 bits)
pub const KEY_LEN: usize = 32;

/// Salt length for passphrase derivation
const SALT_LEN: usize = 16;

/// Keyring service name
const SERVICE_NAME: &str = "examcache";

/// Keyring account holding the token key
const KEY_ACCOUNT: &str = "token-key";

/// Symmetric key bytes, wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial([u8; KEY_LEN]);

impl KeyMaterial {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyMaterial(..)")
    }
}

/// Holder of the token encryption key.
///
/// Implementations must make `delete` irreversible: a key created after a
/// delete must never equal the one that was deleted.
pub trait KeyStore: Send + Sync {
    /// The current key, or `None` if none has been created.
    fn load(&self) -> Result<Option<KeyMaterial>>;

    /// Create and persist a fresh key, replacing any existing one.
    fn create(&self) -> Result<KeyMaterial>;

    /// Destroy the key. Deleting a missing key is not an error.
    fn delete(&self) -> Result<()>;

    fn load_or_create(&self) -> Result<KeyMaterial> {
        match self.load()? {
            Some(key) => Ok(key),
            None => {
                debug!("No token key found, generating one");
                self.create()
            }
        }
    }
}

// ============================================================================
// OS keychain
// ============================================================================

/// Key stored base64-encoded in the OS keychain.
pub struct KeyringKeyStore {
    entry: Entry,
}

impl KeyringKeyStore {
    pub fn new() -> Result<Self> {
        Self::with_account(KEY_ACCOUNT)
    }

    pub fn with_account(account: &str) -> Result<Self> {
        let entry = Entry::new(SERVICE_NAME, account)
            .context("Failed to create keyring entry")?;
        Ok(Self { entry })
    }
}

impl KeyStore for KeyringKeyStore {
    fn load(&self) -> Result<Option<KeyMaterial>> {
        let encoded = match self.entry.get_password() {
            Ok(encoded) => Zeroizing::new(encoded),
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(e) => return Err(e).context("Failed to read token key from keychain"),
        };
        let bytes = Zeroizing::new(
            STANDARD
                .decode(encoded.as_bytes())
                .context("Token key in keychain is not valid base64")?,
        );
        let key: [u8; KEY_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("Token key in keychain has wrong length: {}", bytes.len()))?;
        Ok(Some(KeyMaterial::from_bytes(key)))
    }

    fn create(&self) -> Result<KeyMaterial> {
        let key = KeyMaterial::generate();
        let encoded = Zeroizing::new(STANDARD.encode(key.as_bytes()));
        self.entry
            .set_password(&encoded)
            .context("Failed to store token key in keychain")?;
        Ok(key)
    }

    fn delete(&self) -> Result<()> {
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete token key from keychain"),
        }
    }
}

// ============================================================================
// Passphrase-derived (software fallback)
// ============================================================================

/// Key derived with Argon2id from an application passphrase and a random salt
/// kept on disk. Deleting the salt file destroys the key: the next `create`
/// draws a new random salt.
///
/// The derived key is kept with the salt it came from and re-derived only
/// when the salt file changes.
pub struct PassphraseKeyStore {
    salt_path: PathBuf,
    passphrase: Zeroizing<String>,
    derived: Mutex<Option<(Vec<u8>, KeyMaterial)>>,
    derivations: AtomicUsize,
}

impl PassphraseKeyStore {
    pub fn new(salt_path: PathBuf, passphrase: String) -> Self {
        Self {
            salt_path,
            passphrase: Zeroizing::new(passphrase),
            derived: Mutex::new(None),
            derivations: AtomicUsize::new(0),
        }
    }

    fn derive(&self, salt: &[u8]) -> Result<KeyMaterial> {
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(self.passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| anyhow::anyhow!("Key derivation failed: {}", e))?;
        let material = KeyMaterial::from_bytes(key);
        key.zeroize();
        let count = self.derivations.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(derivations = count, "Derived token key from passphrase");
        Ok(material)
    }

    fn lock_derived(&self) -> Result<MutexGuard<'_, Option<(Vec<u8>, KeyMaterial)>>> {
        self.derived
            .lock()
            .map_err(|_| anyhow::anyhow!("Key store lock poisoned"))
    }
}

impl KeyStore for PassphraseKeyStore {
    fn load(&self) -> Result<Option<KeyMaterial>> {
        let salt = match std::fs::read(&self.salt_path) {
            Ok(salt) => salt,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                *self.lock_derived()? = None;
                return Ok(None);
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read key salt: {}", self.salt_path.display())
                })
            }
        };
        if salt.len() != SALT_LEN {
            anyhow::bail!("Key salt has wrong length: {}", salt.len());
        }

        let mut derived = self.lock_derived()?;
        if let Some((cached_salt, key)) = derived.as_ref() {
            if *cached_salt == salt {
                return Ok(Some(key.clone()));
            }
        }
        let key = self.derive(&salt)?;
        *derived = Some((salt, key.clone()));
        Ok(Some(key))
    }

    fn create(&self) -> Result<KeyMaterial> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let key = self.derive(&salt)?;
        write_atomic(&self.salt_path, &salt)?;
        *self.lock_derived()? = Some((salt.to_vec(), key.clone()));
        Ok(key)
    }

    fn delete(&self) -> Result<()> {
        *self.lock_derived()? = None;
        remove_if_exists(&self.salt_path)?;
        Ok(())
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-local key. Nothing survives the process.
#[derive(Default)]
pub struct MemoryKeyStore {
    key: Mutex<Option<KeyMaterial>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn load(&self) -> Result<Option<KeyMaterial>> {
        let guard = self
            .key
            .lock()
            .map_err(|_| anyhow::anyhow!("Key store lock poisoned"))?;
        Ok(guard.clone())
    }

    fn create(&self) -> Result<KeyMaterial> {
        let key = KeyMaterial::generate();
        let mut guard = self
            .key
            .lock()
            .map_err(|_| anyhow::anyhow!("Key store lock poisoned"))?;
        *guard = Some(key.clone());
        Ok(key)
    }

    fn delete(&self) -> Result<()> {
        let mut guard = self
            .key
            .lock()
            .map_err(|_| anyhow::anyhow!("Key store lock poisoned"))?;
        *guard = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_load_or_create_is_stable() -> Result<()> {
        let store = MemoryKeyStore::new();
        assert!(store.load()?.is_none());

        let first = store.load_or_create()?;
        let second = store.load_or_create()?;
        assert_eq!(first.as_bytes(), second.as_bytes());
        Ok(())
    }

    #[test]
    fn test_memory_store_delete_is_irreversible() -> Result<()> {
        let store = MemoryKeyStore::new();
        let old = store.load_or_create()?;

        store.delete()?;
        store.delete()?; // idempotent
        assert!(store.load()?.is_none());

        let new = store.load_or_create()?;
        assert_ne!(old.as_bytes(), new.as_bytes());
        Ok(())
    }

    #[test]
    fn test_passphrase_store_rederives_same_key() -> Result<()> {
        let dir = TempDir::new()?;
        let salt_path = dir.path().join("token.key");

        let store = PassphraseKeyStore::new(salt_path.clone(), "correct horse".to_string());
        let created = store.create()?;

        // A second instance with the same passphrase sees the same key
        let reopened = PassphraseKeyStore::new(salt_path, "correct horse".to_string());
        let loaded = reopened.load()?.expect("salt should exist");
        assert_eq!(created.as_bytes(), loaded.as_bytes());
        Ok(())
    }

    #[test]
    fn test_passphrase_store_delete_then_create_changes_key() -> Result<()> {
        let dir = TempDir::new()?;
        let store = PassphraseKeyStore::new(dir.path().join("token.key"), "pw".to_string());

        let old = store.load_or_create()?;
        store.delete()?;
        assert!(store.load()?.is_none());

        let new = store.load_or_create()?;
        assert_ne!(old.as_bytes(), new.as_bytes());
        Ok(())
    }

    #[test]
    fn test_passphrase_store_derives_once_per_salt() -> Result<()> {
        let dir = TempDir::new()?;
        let salt_path = dir.path().join("token.key");
        let store = PassphraseKeyStore::new(salt_path.clone(), "pw".to_string());

        let created = store.create()?;
        for _ in 0..5 {
            let loaded = store.load()?.expect("salt should exist");
            assert_eq!(created.as_bytes(), loaded.as_bytes());
        }
        assert_eq!(store.derivations.load(Ordering::Relaxed), 1);

        // A salt replaced behind our back is noticed
        std::fs::write(&salt_path, [9u8; SALT_LEN])?;
        let rederived = store.load()?.expect("salt should exist");
        assert_ne!(created.as_bytes(), rederived.as_bytes());
        assert_eq!(store.derivations.load(Ordering::Relaxed), 2);

        // And so is one removed behind our back
        std::fs::remove_file(&salt_path)?;
        assert!(store.load()?.is_none());
        Ok(())
    }

    #[test]
    fn test_passphrase_store_rejects_bad_salt() -> Result<()> {
        let dir = TempDir::new()?;
        let salt_path = dir.path().join("token.key");
        std::fs::write(&salt_path, b"short")?;

        let store = PassphraseKeyStore::new(salt_path, "pw".to_string());
        assert!(store.load().is_err());
        Ok(())
    }

    /// Needs a working OS keychain; skipped where none is reachable (headless CI).
    #[test]
    fn test_keyring_key_survives_new_store_instance() -> Result<()> {
        let account = format!("test-{:016x}", rand::random::<u64>());
        let first = KeyringKeyStore::with_account(&account)?;
        let created = match first.create() {
            Ok(key) => key,
            Err(e) => {
                eprintln!("skipping, no keychain available: {e:#}");
                return Ok(());
            }
        };

        // A later run builds a fresh store for the same account
        let second = KeyringKeyStore::with_account(&account)?;
        let loaded = second.load();
        first.delete()?;

        let loaded = loaded?.expect("key should be readable from a new instance");
        assert_eq!(created.as_bytes(), loaded.as_bytes());
        Ok(())
    }

    #[test]
    fn test_key_material_debug_hides_bytes() {
        let key = KeyMaterial::from_bytes([7u8; KEY_LEN]);
        assert_eq!(format!("{:?}", key), "KeyMaterial(..)");
    }
}
