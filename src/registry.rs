//! Wallet Registry
//!
//! CRUD over named wallet records, each wrapping a signing keypair. The
//! registry is the exclusive owner and only writer of wallet records; the
//! orchestrator and aggregator borrow the active record's address and
//! signing capability but never persist their own copy.
//!
//! Invariant: at most one record is active, and exactly one whenever the
//! registry is non-empty. Every mutation persists the full set through the
//! secure storage adapter all-or-nothing: if the write fails the in-memory
//! state is left untouched and the error propagates unchanged.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::{Result, WalletError};
use crate::keys::WalletKeys;
use crate::storage::SecureStorage;

/// Adapter key under which the wallet set is persisted.
const REGISTRY_KEY: &str = "registry:wallets";

/// Persisted registry format version.
const REGISTRY_VERSION: u32 = 1;

/// One named wallet.
#[derive(Clone)]
pub struct WalletRecord {
    /// Opaque identifier, stable across renames.
    pub id: String,
    pub display_name: String,
    /// Base-58 address, derived from the keypair.
    pub public_address: String,
    /// Optional avatar image reference.
    pub avatar: Option<String>,
    pub is_active: bool,
    keys: WalletKeys,
}

impl WalletRecord {
    /// Signing capability for this wallet.
    pub fn keys(&self) -> &WalletKeys {
        &self.keys
    }
}

impl std::fmt::Debug for WalletRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletRecord")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("public_address", &self.public_address)
            .field("is_active", &self.is_active)
            .finish_non_exhaustive()
    }
}

/// Persisted form of one record. Secrets are stored only as serialized
/// secret-key byte arrays; recovery phrases are never written.
#[derive(Serialize, Deserialize)]
struct PersistedRecord {
    id: String,
    display_name: String,
    avatar: Option<String>,
    secret_key: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct PersistedRegistry {
    version: u32,
    active_id: Option<String>,
    wallets: Vec<PersistedRecord>,
}

/// The multi-wallet registry.
pub struct WalletRegistry {
    storage: Arc<dyn SecureStorage>,
    wallets: Vec<WalletRecord>,
}

impl WalletRegistry {
    /// Rebuild the registry from storage at startup.
    ///
    /// Unparseable persisted secret material is a hard error. A wallet that
    /// cannot be decoded must never be silently replaced by a fresh one.
    pub fn load(storage: Arc<dyn SecureStorage>) -> Result<Self> {
        let wallets = match storage.get(REGISTRY_KEY)? {
            None => Vec::new(),
            Some(bytes) => {
                let persisted: PersistedRegistry = serde_json::from_slice(&bytes)
                    .map_err(|e| WalletError::Storage(format!("corrupt wallet registry: {e}")))?;
                if persisted.version != REGISTRY_VERSION {
                    return Err(WalletError::Storage(format!(
                        "unsupported registry version: {}",
                        persisted.version
                    )));
                }

                let mut wallets = Vec::with_capacity(persisted.wallets.len());
                for record in persisted.wallets {
                    let keys = WalletKeys::from_secret_bytes(&record.secret_key).map_err(|e| {
                        WalletError::Storage(format!(
                            "stored secret for wallet {} is unusable: {e}",
                            record.id
                        ))
                    })?;
                    let public_address = keys.public_address();
                    wallets.push(WalletRecord {
                        is_active: persisted.active_id.as_deref() == Some(record.id.as_str()),
                        id: record.id,
                        display_name: record.display_name,
                        avatar: record.avatar,
                        public_address,
                        keys,
                    });
                }

                // Repair a missing active marker rather than operating with
                // none: the invariant requires exactly one when non-empty.
                if !wallets.is_empty() && !wallets.iter().any(|w| w.is_active) {
                    wallets[0].is_active = true;
                }
                wallets
            }
        };

        debug!(count = wallets.len(), "wallet registry loaded");
        Ok(Self { storage, wallets })
    }

    /// Generate a fresh wallet.
    ///
    /// Returns the new record together with its recovery phrase. The phrase
    /// is returned exactly once and is never stored; only the derived
    /// secret-key bytes are persisted. The first wallet in an empty
    /// registry becomes active immediately; later ones stay inactive until
    /// the caller switches to them.
    pub fn create(&mut self, name: &str) -> Result<(WalletRecord, Zeroizing<String>)> {
        validate_name(name)?;

        let generated = WalletKeys::generate();
        let phrase = Zeroizing::new(
            generated
                .mnemonic_phrase()
                .expect("generated keys always carry a phrase")
                .to_string(),
        );

        // Re-derive from secret bytes so the registry copy holds no phrase.
        let keys = WalletKeys::from_secret_bytes(&generated.to_secret_bytes())?;
        let record = self.insert(name, keys)?;
        info!(id = %record.id, "wallet created");
        Ok((record, phrase))
    }

    /// Import a wallet from secret material (mnemonic, hex, base-58 or a
    /// JSON byte array). Fails with [`WalletError::DuplicateWallet`] if the
    /// derived address is already registered; the registry is unchanged in
    /// that case.
    pub fn import(&mut self, name: &str, secret_material: &str) -> Result<WalletRecord> {
        validate_name(name)?;

        let keys = WalletKeys::from_secret_material(secret_material)?;
        let address = keys.public_address();
        if self.wallets.iter().any(|w| w.public_address == address) {
            return Err(WalletError::DuplicateWallet);
        }

        let record = self.insert(name, keys)?;
        info!(id = %record.id, "wallet imported");
        Ok(record)
    }

    /// Make `id` the single active wallet and return the new active record
    /// so dependents can rebind and refresh.
    pub fn switch_active(&mut self, id: &str) -> Result<WalletRecord> {
        self.index_of(id)?;

        let mut next = self.wallets.clone();
        for wallet in &mut next {
            wallet.is_active = wallet.id == id;
        }
        self.commit(next)?;

        let record = self.get(id).expect("record present after switch").clone();
        info!(id = %record.id, "active wallet switched");
        Ok(record)
    }

    /// Rename a wallet.
    pub fn rename(&mut self, id: &str, new_name: &str) -> Result<()> {
        validate_name(new_name)?;
        let index = self.index_of(id)?;

        let mut next = self.wallets.clone();
        next[index].display_name = new_name.to_string();
        self.commit(next)
    }

    /// Set or clear a wallet's avatar reference.
    pub fn set_avatar(&mut self, id: &str, avatar: Option<String>) -> Result<()> {
        let index = self.index_of(id)?;

        let mut next = self.wallets.clone();
        next[index].avatar = avatar;
        self.commit(next)
    }

    /// Remove a wallet. Refused for the active wallet and for the last
    /// remaining one.
    pub fn remove(&mut self, id: &str) -> Result<()> {
        let index = self.index_of(id)?;

        // The last wallet is necessarily active; report the more specific
        // condition for it.
        if self.wallets.len() == 1 {
            return Err(WalletError::CannotRemoveLast);
        }
        if self.wallets[index].is_active {
            return Err(WalletError::CannotRemoveActive);
        }

        let mut next = self.wallets.clone();
        next.remove(index);
        self.commit(next)?;
        info!(%id, "wallet removed");
        Ok(())
    }

    /// The active wallet, if the registry is non-empty.
    pub fn active(&self) -> Option<&WalletRecord> {
        self.wallets.iter().find(|w| w.is_active)
    }

    /// Look up a record by id.
    pub fn get(&self, id: &str) -> Option<&WalletRecord> {
        self.wallets.iter().find(|w| w.id == id)
    }

    /// All records, in insertion order.
    pub fn wallets(&self) -> &[WalletRecord] {
        &self.wallets
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    /// Insert a new record, activating it iff the registry was empty.
    fn insert(&mut self, name: &str, keys: WalletKeys) -> Result<WalletRecord> {
        let record = WalletRecord {
            id: new_wallet_id(),
            display_name: name.to_string(),
            public_address: keys.public_address(),
            avatar: None,
            is_active: self.wallets.is_empty(),
            keys,
        };

        let mut next = self.wallets.clone();
        next.push(record.clone());
        self.commit(next)?;
        Ok(record)
    }

    fn index_of(&self, id: &str) -> Result<usize> {
        self.wallets
            .iter()
            .position(|w| w.id == id)
            .ok_or_else(|| WalletError::WalletNotFound(id.to_string()))
    }

    /// Persist a candidate state; commit it in memory only if the write
    /// succeeded.
    fn commit(&mut self, next: Vec<WalletRecord>) -> Result<()> {
        let persisted = PersistedRegistry {
            version: REGISTRY_VERSION,
            active_id: next.iter().find(|w| w.is_active).map(|w| w.id.clone()),
            wallets: next
                .iter()
                .map(|w| PersistedRecord {
                    id: w.id.clone(),
                    display_name: w.display_name.clone(),
                    avatar: w.avatar.clone(),
                    secret_key: w.keys.to_secret_bytes().to_vec(),
                })
                .collect(),
        };

        let bytes = serde_json::to_vec(&persisted)
            .map_err(|e| WalletError::Storage(format!("failed to serialize registry: {e}")))?;
        self.storage.set(REGISTRY_KEY, &bytes)?;
        self.wallets = next;
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(WalletError::validation("wallet name must not be empty"));
    }
    Ok(())
}

fn new_wallet_id() -> String {
    let mut bytes = [0u8; 8];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
