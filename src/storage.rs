//! Secure Storage Adapter
//!
//! Key-value persistence with at-least-once durability. Wallet secrets are
//! stored only as serialized secret-key byte arrays under adapter-managed
//! keys; the in-memory model is always a cache of this layer, rebuilt at
//! startup.
//!
//! The production implementation, [`FileVault`], encrypts every entry with:
//! - Argon2id for password-based key derivation
//! - ChaCha20-Poly1305 for authenticated encryption

use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHasher,
};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use zeroize::Zeroizing;

use crate::error::{Result, WalletError};

/// Current vault file format version
const VAULT_VERSION: u32 = 1;

/// Argon2 parameters (tuned for security vs. usability)
const ARGON2_MEMORY_KB: u32 = 65536; // 64 MB
const ARGON2_ITERATIONS: u32 = 3;
const ARGON2_PARALLELISM: u32 = 4;

/// Sentinel entry used to verify the password when reopening a vault.
const VERIFIER_KEY: &str = "__vault_verifier";
const VERIFIER_VALUE: &[u8] = b"ember-vault-v1";

/// Durable key-value storage for wallet state.
///
/// Implementations must survive process restarts and must not expose stored
/// values to other processes on the device. Writes are all-or-nothing: on
/// error the previously stored value must remain intact.
pub trait SecureStorage: Send + Sync {
    /// Fetch the value stored under `key`, or `None` if absent.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Durably store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// Volatile in-memory storage for tests.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecureStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| WalletError::Storage("storage lock poisoned".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| WalletError::Storage("storage lock poisoned".into()))?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

/// A single encrypted entry: nonce and ciphertext, hex encoded.
#[derive(Serialize, Deserialize, Clone)]
struct VaultEntry {
    nonce: String,
    ciphertext: String,
}

/// On-disk vault file structure.
#[derive(Serialize, Deserialize)]
struct VaultFile {
    /// File format version
    version: u32,

    /// Argon2 salt (base64 encoded)
    salt: String,

    /// Encrypted entries keyed by adapter key
    entries: HashMap<String, VaultEntry>,
}

/// Encrypted-at-rest file storage, opened with the user's password.
///
/// Every entry is independently encrypted with a fresh nonce under a key
/// derived once per open. The whole file is rewritten on each `set`, so a
/// failed write leaves the previous file contents untouched.
pub struct FileVault {
    path: PathBuf,
    inner: Mutex<VaultInner>,
}

/// Derived key and decoded file, kept together so a re-key swaps both
/// atomically.
struct VaultInner {
    key: Zeroizing<[u8; 32]>,
    file: VaultFile,
}

impl FileVault {
    /// Create a new vault at `path`, keyed by `password`.
    pub fn create(path: &Path, password: &str) -> Result<Self> {
        if path.exists() {
            return Err(WalletError::Storage(format!(
                "vault already exists at {}",
                path.display()
            )));
        }

        let salt = SaltString::generate(&mut OsRng);
        let key = derive_key(password, salt.as_str())?;

        let file = VaultFile {
            version: VAULT_VERSION,
            salt: salt.to_string(),
            entries: HashMap::new(),
        };

        let vault = Self {
            path: path.to_path_buf(),
            inner: Mutex::new(VaultInner { key, file }),
        };

        // Password-verification sentinel, checked on reopen.
        vault.set(VERIFIER_KEY, VERIFIER_VALUE)?;
        Ok(vault)
    }

    /// Open an existing vault, verifying the password against the stored
    /// sentinel entry.
    pub fn open(path: &Path, password: &str) -> Result<Self> {
        let json = fs::read_to_string(path)
            .map_err(|e| WalletError::Storage(format!("failed to read vault file: {e}")))?;
        let file: VaultFile = serde_json::from_str(&json)
            .map_err(|e| WalletError::Storage(format!("failed to parse vault file: {e}")))?;

        if file.version != VAULT_VERSION {
            return Err(WalletError::Storage(format!(
                "unsupported vault version: {} (expected {})",
                file.version, VAULT_VERSION
            )));
        }

        let key = derive_key(password, &file.salt)?;
        let vault = Self {
            path: path.to_path_buf(),
            inner: Mutex::new(VaultInner { key, file }),
        };

        match vault.get(VERIFIER_KEY)? {
            Some(v) if v == VERIFIER_VALUE => Ok(vault),
            _ => Err(WalletError::AuthenticationFailed),
        }
    }

    /// Open a vault if one exists at `path`, otherwise create it.
    pub fn open_or_create(path: &Path, password: &str) -> Result<Self> {
        if path.exists() {
            Self::open(path, password)
        } else {
            Self::create(path, password)
        }
    }

    /// True if a vault file exists at `path`.
    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    /// Re-key the vault under a new password, re-encrypting every entry.
    pub fn change_password(&self, old_password: &str, new_password: &str) -> Result<()> {
        let mut inner = self.lock_inner()?;

        // Verify the caller holds the current password by opening the
        // sentinel entry, the same check `open` performs.
        let old_key = derive_key(old_password, &inner.file.salt)?;
        let verifier = inner
            .file
            .entries
            .get(VERIFIER_KEY)
            .ok_or(WalletError::AuthenticationFailed)?;
        match decrypt_entry(&old_key, verifier) {
            Ok(plaintext) if plaintext == VERIFIER_VALUE => {}
            _ => return Err(WalletError::AuthenticationFailed),
        }

        let salt = SaltString::generate(&mut OsRng);
        let new_key = derive_key(new_password, salt.as_str())?;

        let mut reencrypted = HashMap::with_capacity(inner.file.entries.len());
        for (entry_key, entry) in &inner.file.entries {
            let plaintext = decrypt_entry(&inner.key, entry)?;
            reencrypted.insert(entry_key.clone(), encrypt_entry(&new_key, &plaintext)?);
        }

        let rekeyed = VaultFile {
            version: inner.file.version,
            salt: salt.to_string(),
            entries: reencrypted,
        };
        self.persist(&rekeyed)?;

        // Commit in memory only after the file write succeeded.
        inner.file = rekeyed;
        inner.key = new_key;
        Ok(())
    }

    fn lock_inner(&self) -> Result<std::sync::MutexGuard<'_, VaultInner>> {
        self.inner
            .lock()
            .map_err(|_| WalletError::Storage("vault lock poisoned".into()))
    }

    /// Write the vault file with restricted permissions.
    fn persist(&self, file: &VaultFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| WalletError::Storage(format!("failed to create vault dir: {e}")))?;
        }

        let json = serde_json::to_string_pretty(file)
            .map_err(|e| WalletError::Storage(format!("failed to serialize vault: {e}")))?;

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut f = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&self.path)
                .map_err(|e| WalletError::Storage(format!("failed to open vault file: {e}")))?;
            f.write_all(json.as_bytes())
                .map_err(|e| WalletError::Storage(format!("failed to write vault file: {e}")))?;
        }

        #[cfg(not(unix))]
        {
            fs::write(&self.path, json)
                .map_err(|e| WalletError::Storage(format!("failed to write vault file: {e}")))?;
        }

        Ok(())
    }
}

impl SecureStorage for FileVault {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let inner = self.lock_inner()?;
        match inner.file.entries.get(key) {
            Some(entry) => Ok(Some(decrypt_entry(&inner.key, entry)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut inner = self.lock_inner()?;
        let encrypted = encrypt_entry(&inner.key, value)?;
        let previous = inner.file.entries.insert(key.to_string(), encrypted);

        // All-or-nothing: roll the in-memory entry back if the write fails.
        if let Err(e) = self.persist(&inner.file) {
            match previous {
                Some(old) => {
                    inner.file.entries.insert(key.to_string(), old);
                }
                None => {
                    inner.file.entries.remove(key);
                }
            }
            return Err(e);
        }
        Ok(())
    }
}

/// Encrypt a value with a fresh random nonce.
fn encrypt_entry(key: &[u8; 32], plaintext: &[u8]) -> Result<VaultEntry> {
    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill(&mut nonce_bytes);

    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| WalletError::Storage("failed to create cipher".into()))?;

    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| WalletError::Storage("encryption failed".into()))?;

    Ok(VaultEntry {
        nonce: hex::encode(nonce_bytes),
        ciphertext: hex::encode(ciphertext),
    })
}

/// Decrypt a stored entry.
fn decrypt_entry(key: &[u8; 32], entry: &VaultEntry) -> Result<Vec<u8>> {
    let nonce_bytes =
        hex::decode(&entry.nonce).map_err(|_| WalletError::Storage("invalid nonce format".into()))?;
    let ciphertext = hex::decode(&entry.ciphertext)
        .map_err(|_| WalletError::Storage("invalid ciphertext format".into()))?;

    if nonce_bytes.len() != 12 {
        return Err(WalletError::Storage("invalid nonce length".into()));
    }

    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| WalletError::Storage("failed to create cipher".into()))?;

    let nonce = Nonce::from_slice(&nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext.as_slice())
        .map_err(|_| WalletError::Storage("decryption failed - wrong password?".into()))
}

/// Derive a 32-byte encryption key from a password using Argon2id.
fn derive_key(password: &str, salt: &str) -> Result<Zeroizing<[u8; 32]>> {
    let salt = SaltString::from_b64(salt)
        .map_err(|_| WalletError::Storage("invalid salt format".into()))?;

    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2::Params::new(
            ARGON2_MEMORY_KB,
            ARGON2_ITERATIONS,
            ARGON2_PARALLELISM,
            Some(32),
        )
        .map_err(|_| WalletError::Storage("invalid Argon2 parameters".into()))?,
    );

    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|_| WalletError::Storage("key derivation failed".into()))?;

    let hash_output = hash
        .hash
        .ok_or_else(|| WalletError::Storage("no hash output".into()))?;

    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&hash_output.as_bytes()[..32]);
    Ok(key)
}
