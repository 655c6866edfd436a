//! Wallet Error Taxonomy
//!
//! Every fallible operation in the crate returns [`WalletError`]. The
//! variants are deliberately specific: callers dispatch on them to decide
//! between dead-end errors, retry paths and the fund-and-retry flow.
//!
//! Secrets (mnemonics, private keys, passwords) never appear in any
//! variant's payload or `Display` output.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, WalletError>;

/// Unified error type for all wallet core operations.
#[derive(Debug, Error)]
pub enum WalletError {
    /// Bad local input. Detected before any network access; never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Imported secret material resolves to an address already registered.
    #[error("a wallet with this address already exists")]
    DuplicateWallet,

    /// A mutation named a wallet id that is not in the registry.
    #[error("no wallet with id {0}")]
    WalletNotFound(String),

    /// The active wallet cannot be removed; switch first.
    #[error("cannot remove the active wallet")]
    CannotRemoveActive,

    /// The last remaining wallet cannot be removed.
    #[error("cannot remove the last wallet")]
    CannotRemoveLast,

    /// Password verification failed. Intentionally carries no detail about
    /// which part of the comparison failed.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// No biometric credential is registered or the platform authenticator
    /// is not available.
    #[error("biometric authentication unavailable")]
    BiometricUnavailable,

    /// The biometric ceremony ran and was rejected.
    #[error("biometric authentication rejected")]
    BiometricRejected,

    /// A gated operation was invoked while the session is locked.
    #[error("wallet is locked")]
    Locked,

    /// The active wallet's known balance does not cover the quoted cost.
    /// Checked locally before any network round-trip so the caller can
    /// offer a fund-and-retry path.
    #[error("insufficient funds: need {required} base units, have {available}")]
    InsufficientFunds { required: u64, available: u64 },

    /// `confirm` was called with no live preview to confirm.
    #[error("no pending transaction preview")]
    NoPendingPreview,

    /// Transport-level failure: unreachable endpoint, connection reset,
    /// malformed response body.
    #[error("network error: {0}")]
    Network(String),

    /// A request exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// The remote service answered with a well-formed error.
    #[error("remote service rejected the request: {0}")]
    RemoteRejected(String),

    /// The network accepted the transaction but the ledger rejected it.
    /// `logs` carries raw on-chain diagnostic lines when available.
    #[error("on-chain failure: {message}")]
    OnChainFailure { message: String, logs: Vec<String> },

    /// The secure storage adapter failed to read or persist state.
    #[error("storage error: {0}")]
    Storage(String),
}

impl WalletError {
    /// Build a `Validation` error from anything displayable.
    pub fn validation(msg: impl Into<String>) -> Self {
        WalletError::Validation(msg.into())
    }

    /// True for errors where retrying the same call could succeed
    /// (transport problems), as opposed to local invariant violations.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalletError::Network(_) | WalletError::Timeout)
    }
}

impl From<reqwest::Error> for WalletError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            WalletError::Timeout
        } else {
            // reqwest errors can embed URLs but never request bodies, so
            // this cannot leak secret material.
            WalletError::Network(err.to_string())
        }
    }
}
