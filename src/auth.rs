//! Authentication Gate
//!
//! Password verification and optional biometric unlock, with a rolling
//! session timeout. The gate stores only a one-way Argon2id digest of the
//! password, never the plaintext.
//!
//! Lock expiry is a pure function of `(now, last_unlock)` evaluated
//! whenever the gate is consulted. There is no background timer, so a
//! concurrent unlock can never race a timer firing.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{Result, WalletError};
use crate::storage::SecureStorage;

/// Session window: how long an unlock is valid.
pub const UNLOCK_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Minimum password length.
const MIN_PASSWORD_LEN: usize = 8;

/// Adapter key for the persisted gate state.
const AUTH_STATE_KEY: &str = "auth:state";

/// Platform biometric / hardware-credential authenticator.
///
/// Biometrics supplement the password: they are an additional unlock path,
/// never a way to establish authentication state. A failed ceremony must
/// not fall back to the password path automatically.
pub trait BiometricAuthenticator: Send + Sync {
    /// Enroll a credential, returning its opaque handle.
    fn register(&self) -> Result<String>;

    /// Run the challenge-response ceremony for a registered credential.
    fn challenge(&self, credential_id: &str) -> Result<()>;
}

/// Gate state as observed at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// No password has ever been set.
    Uninitialized,
    /// A password exists but the session window has expired (or never began).
    Locked,
    /// Within the session window.
    Unlocked,
}

/// Persisted portion of the gate (digest and credential handle only;
/// the unlock timestamp is deliberately volatile).
#[derive(Serialize, Deserialize, Default, Clone)]
struct PersistedAuthState {
    password_hash: Option<String>,
    biometric_credential_id: Option<String>,
}

/// The unlock/authentication gate.
pub struct AuthGate {
    storage: Arc<dyn SecureStorage>,
    state: PersistedAuthState,
    last_unlock: Option<Instant>,
}

impl AuthGate {
    /// Rebuild the gate from storage at startup. The session always starts
    /// locked; restarts never inherit an unlock window.
    pub fn load(storage: Arc<dyn SecureStorage>) -> Result<Self> {
        let state = match storage.get(AUTH_STATE_KEY)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| WalletError::Storage(format!("corrupt auth state: {e}")))?,
            None => PersistedAuthState::default(),
        };

        Ok(Self {
            storage,
            state,
            last_unlock: None,
        })
    }

    /// First-time password creation. Requires a minimum length and a
    /// matching confirmation, and unlocks the session on success.
    pub fn set_password(&mut self, password: &str, confirm: &str, now: Instant) -> Result<()> {
        if self.state.password_hash.is_some() {
            return Err(WalletError::validation(
                "password already set; use change_password",
            ));
        }
        validate_new_password(password, confirm)?;

        let digest = hash_password(password)?;
        self.persist_with(|state| state.password_hash = Some(digest.clone()))?;
        self.last_unlock = Some(now);
        debug!("password set, session unlocked");
        Ok(())
    }

    /// Change the password. The old password must verify first.
    pub fn change_password(
        &mut self,
        old_password: &str,
        new_password: &str,
        confirm: &str,
        now: Instant,
    ) -> Result<()> {
        self.verify_password(old_password)?;
        validate_new_password(new_password, confirm)?;

        let digest = hash_password(new_password)?;
        self.persist_with(|state| state.password_hash = Some(digest.clone()))?;
        self.last_unlock = Some(now);
        Ok(())
    }

    /// Unlock with the password, stamping the session window on success.
    pub fn unlock(&mut self, password: &str, now: Instant) -> Result<()> {
        self.verify_password(password)?;
        self.last_unlock = Some(now);
        debug!("session unlocked via password");
        Ok(())
    }

    /// Enroll a biometric credential. Requires an unlocked session so a
    /// locked device cannot grow a new unlock path.
    pub fn register_biometric(
        &mut self,
        authenticator: &dyn BiometricAuthenticator,
        now: Instant,
    ) -> Result<()> {
        self.require_unlocked(now)?;
        let credential_id = authenticator.register()?;
        self.persist_with(|state| {
            state.biometric_credential_id = Some(credential_id.clone())
        })?;
        Ok(())
    }

    /// Remove the enrolled biometric credential, if any.
    pub fn clear_biometric(&mut self) -> Result<()> {
        self.persist_with(|state| state.biometric_credential_id = None)
    }

    /// Unlock via the biometric ceremony. Fails with
    /// [`WalletError::BiometricUnavailable`] when no credential is enrolled
    /// (or no password exists at all); a rejected ceremony surfaces as
    /// [`WalletError::BiometricRejected`] and never falls back to the
    /// password path.
    pub fn unlock_biometric(
        &mut self,
        authenticator: &dyn BiometricAuthenticator,
        now: Instant,
    ) -> Result<()> {
        if self.state.password_hash.is_none() {
            return Err(WalletError::BiometricUnavailable);
        }
        let credential_id = self
            .state
            .biometric_credential_id
            .as_deref()
            .ok_or(WalletError::BiometricUnavailable)?;

        authenticator.challenge(credential_id)?;
        self.last_unlock = Some(now);
        debug!("session unlocked via biometric credential");
        Ok(())
    }

    /// Relock immediately, ending the session window.
    pub fn lock(&mut self) {
        if self.last_unlock.take().is_some() {
            debug!("session locked");
        }
    }

    /// Gate state at `now`. Expiry is evaluated here, lazily.
    pub fn state_at(&self, now: Instant) -> GateState {
        if self.state.password_hash.is_none() {
            return GateState::Uninitialized;
        }
        match self.last_unlock {
            Some(last) if now.duration_since(last) < UNLOCK_TIMEOUT => GateState::Unlocked,
            _ => GateState::Locked,
        }
    }

    /// True iff the session window is live at `now`.
    pub fn is_unlocked(&self, now: Instant) -> bool {
        self.state_at(now) == GateState::Unlocked
    }

    /// Error helper for gated operations.
    pub fn require_unlocked(&self, now: Instant) -> Result<()> {
        if self.is_unlocked(now) {
            Ok(())
        } else {
            Err(WalletError::Locked)
        }
    }

    /// True once a password has been set.
    pub fn has_password(&self) -> bool {
        self.state.password_hash.is_some()
    }

    /// True if a biometric credential is enrolled.
    pub fn has_biometric(&self) -> bool {
        self.state.biometric_credential_id.is_some()
    }

    /// Verify a password against the stored digest. The error carries no
    /// detail about which part of the comparison failed.
    fn verify_password(&self, password: &str) -> Result<()> {
        let stored = self
            .state
            .password_hash
            .as_deref()
            .ok_or(WalletError::AuthenticationFailed)?;
        let parsed = PasswordHash::new(stored).map_err(|_| WalletError::AuthenticationFailed)?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| WalletError::AuthenticationFailed)
    }

    /// Apply a mutation to a copy of the persisted state, write it through
    /// storage, and only then commit it in memory.
    fn persist_with(&mut self, mutate: impl Fn(&mut PersistedAuthState)) -> Result<()> {
        let mut next = self.state.clone();
        mutate(&mut next);
        let bytes = serde_json::to_vec(&next)
            .map_err(|e| WalletError::Storage(format!("failed to serialize auth state: {e}")))?;
        self.storage.set(AUTH_STATE_KEY, &bytes)?;
        self.state = next;
        Ok(())
    }
}

/// Minimum-length and confirmation checks for a new password.
fn validate_new_password(password: &str, confirm: &str) -> Result<()> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(WalletError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if password != confirm {
        return Err(WalletError::validation("password confirmation does not match"));
    }
    Ok(())
}

/// One-way Argon2id digest in PHC string format.
fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|_| WalletError::Storage("password hashing failed".into()))?;
    Ok(hash.to_string())
}
