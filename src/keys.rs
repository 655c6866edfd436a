//! Key Derivation & Signing
//!
//! Handles BIP39 mnemonic generation and ed25519 key derivation for Ember
//! wallet keys. Derivation follows the standard BIP39 seed construction
//! (PBKDF2-HMAC-SHA512, 2048 iterations, over the normalized phrase) with
//! the 64-byte seed truncated to the 32-byte ed25519 secret, so the same
//! phrase always recovers the same address.
//!
//! Security: Mnemonic phrases are stored in `Zeroizing<String>` wrappers
//! that overwrite memory with zeros when dropped. This module is pure and
//! stateless; it performs no I/O.

use bip39::{Language, Mnemonic, MnemonicType, Seed};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{Result, WalletError};

/// Number of words in a freshly generated mnemonic phrase.
const MNEMONIC_WORDS: MnemonicType = MnemonicType::Words12;

/// Size of an ed25519 secret seed in bytes.
pub const SECRET_SEED_LEN: usize = 32;

/// Size of the concatenated secret-plus-public keypair encoding.
pub const SECRET_KEYPAIR_LEN: usize = 64;

/// Signing keys for one wallet, optionally carrying the mnemonic they were
/// derived from.
///
/// Wallets imported from raw secret bytes have no recovery phrase; wallets
/// created or imported from a mnemonic keep it (zeroized on drop) so the
/// caller can show it exactly once for backup.
pub struct WalletKeys {
    /// Recovery phrase, if this wallet was derived from one.
    mnemonic_phrase: Option<Zeroizing<String>>,

    /// The derived ed25519 signing key.
    signing_key: SigningKey,
}

impl Clone for WalletKeys {
    fn clone(&self) -> Self {
        Self {
            mnemonic_phrase: self.mnemonic_phrase.clone(),
            signing_key: self.signing_key.clone(),
        }
    }
}

impl WalletKeys {
    /// Generate a new wallet with a random mnemonic.
    pub fn generate() -> Self {
        let mnemonic = Mnemonic::new(MNEMONIC_WORDS, Language::English);
        Self::from_mnemonic_internal(mnemonic)
    }

    /// Restore a wallet from a mnemonic phrase.
    ///
    /// The phrase is checksum-validated; whitespace is normalized before
    /// derivation so "word  word" and "word word" recover the same keys.
    pub fn from_mnemonic(phrase: &str) -> Result<Self> {
        let normalized = phrase.split_whitespace().collect::<Vec<_>>().join(" ");
        let mnemonic = Mnemonic::from_phrase(&normalized, Language::English)
            .map_err(|e| WalletError::validation(format!("invalid mnemonic phrase: {e}")))?;
        Ok(Self::from_mnemonic_internal(mnemonic))
    }

    /// Internal constructor from a validated mnemonic.
    fn from_mnemonic_internal(mnemonic: Mnemonic) -> Self {
        let phrase = Zeroizing::new(mnemonic.phrase().to_string());

        // BIP39 seed: PBKDF2-HMAC-SHA512, 2048 iterations, empty passphrase.
        let seed = Seed::new(&mnemonic, "");
        let mut secret = [0u8; SECRET_SEED_LEN];
        secret.copy_from_slice(&seed.as_bytes()[..SECRET_SEED_LEN]);
        let signing_key = SigningKey::from_bytes(&secret);
        secret.zeroize();

        Self {
            mnemonic_phrase: Some(phrase),
            signing_key,
        }
    }

    /// Restore a wallet from raw secret bytes.
    ///
    /// Accepts either the 32-byte seed or the 64-byte seed-plus-public
    /// keypair encoding. For the 64-byte form, the embedded public half
    /// must match the key derived from the secret half.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let signing_key = match bytes.len() {
            SECRET_SEED_LEN => {
                let mut secret = [0u8; SECRET_SEED_LEN];
                secret.copy_from_slice(bytes);
                let key = SigningKey::from_bytes(&secret);
                secret.zeroize();
                key
            }
            SECRET_KEYPAIR_LEN => {
                let mut secret = [0u8; SECRET_SEED_LEN];
                secret.copy_from_slice(&bytes[..SECRET_SEED_LEN]);
                let key = SigningKey::from_bytes(&secret);
                secret.zeroize();
                if key.verifying_key().as_bytes() != &bytes[SECRET_SEED_LEN..] {
                    return Err(WalletError::validation(
                        "secret key does not match its embedded public key",
                    ));
                }
                key
            }
            other => {
                return Err(WalletError::validation(format!(
                    "secret key must be {SECRET_SEED_LEN} or {SECRET_KEYPAIR_LEN} bytes, got {other}"
                )));
            }
        };

        Ok(Self {
            mnemonic_phrase: None,
            signing_key,
        })
    }

    /// Import a wallet from user-supplied secret material.
    ///
    /// Tries an ordered chain of parsers, each of which either produces a
    /// typed result or declines to the next:
    ///
    /// 1. JSON byte array (`[12, 34, ...]`)
    /// 2. hex string
    /// 3. base-58 string
    /// 4. mnemonic phrase
    ///
    /// If every parser declines the import fails with a validation error.
    /// The chain never falls through to generating a fresh wallet.
    pub fn from_secret_material(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(WalletError::validation("secret material is empty"));
        }

        if trimmed.starts_with('[') {
            let bytes: Vec<u8> = serde_json::from_str(trimmed)
                .map_err(|_| WalletError::validation("malformed JSON byte array"))?;
            let bytes = Zeroizing::new(bytes);
            return Self::from_secret_bytes(&bytes);
        }

        if let Ok(bytes) = hex::decode(trimmed) {
            let bytes = Zeroizing::new(bytes);
            return Self::from_secret_bytes(&bytes);
        }

        // Single-token input that isn't hex can only be base-58.
        if !trimmed.contains(char::is_whitespace) {
            let bytes = bs58::decode(trimmed)
                .into_vec()
                .map_err(|_| WalletError::validation("unrecognized secret key encoding"))?;
            let bytes = Zeroizing::new(bytes);
            return Self::from_secret_bytes(&bytes);
        }

        Self::from_mnemonic(trimmed)
    }

    /// Get the mnemonic phrase, if this wallet has one.
    pub fn mnemonic_phrase(&self) -> Option<&str> {
        self.mnemonic_phrase.as_ref().map(|p| p.as_str())
    }

    /// Get the base-58 public address for this wallet.
    pub fn public_address(&self) -> String {
        bs58::encode(self.signing_key.verifying_key().as_bytes()).into_string()
    }

    /// Get the verifying (public) key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Serialize the secret for persistence: the 64-byte seed-plus-public
    /// keypair encoding, wrapped so the buffer is zeroized on drop.
    pub fn to_secret_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.signing_key.to_keypair_bytes().to_vec())
    }

    /// Sign an opaque payload with this wallet's key.
    pub fn sign(&self, payload: &[u8]) -> [u8; 64] {
        self.signing_key.sign(payload).to_bytes()
    }
}

impl std::fmt::Debug for WalletKeys {
    // Never expose secret material through Debug formatting.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletKeys")
            .field("public_address", &self.public_address())
            .finish_non_exhaustive()
    }
}

/// A single-use keypair generated for one preview/confirm cycle.
///
/// Drafts that mint a new on-chain asset need a fresh keypair to act as the
/// asset's identity; it is bound to the preview it was generated for so the
/// signed payload matches exactly what was quoted.
pub struct EphemeralSigner {
    signing_key: SigningKey,
}

impl EphemeralSigner {
    /// Generate a fresh single-use signer.
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        Self {
            signing_key: SigningKey::generate(&mut rng),
        }
    }

    /// Base-58 public address of the ephemeral identity.
    pub fn public_address(&self) -> String {
        bs58::encode(self.signing_key.verifying_key().as_bytes()).into_string()
    }

    /// Sign an opaque payload.
    pub fn sign(&self, payload: &[u8]) -> [u8; 64] {
        self.signing_key.sign(payload).to_bytes()
    }
}

impl std::fmt::Debug for EphemeralSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralSigner")
            .field("public_address", &self.public_address())
            .finish_non_exhaustive()
    }
}

/// Validate a mnemonic phrase without constructing keys.
pub fn validate_mnemonic(phrase: &str) -> Result<()> {
    let normalized = phrase.split_whitespace().collect::<Vec<_>>().join(" ");
    Mnemonic::from_phrase(&normalized, Language::English)
        .map_err(|e| WalletError::validation(format!("invalid mnemonic: {e}")))?;
    Ok(())
}
