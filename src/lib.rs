//! Ember Wallet Core
//!
//! An embeddable self-custody wallet for the Ember network: multiple
//! wallets behind one encrypted store, a password/biometric session gate,
//! preview-then-confirm transaction flows and a live portfolio view.
//!
//! ## Security Model
//!
//! - Private keys never leave the device; drafts are built remotely but
//!   signed locally
//! - Everything at rest is encrypted; recovery phrases are never persisted
//! - Remote quotes are untrusted and recomputed before funds move
//! - Key-touching operations sit behind a session gate with a fixed
//!   unlock window

pub mod auth;
pub mod config;
pub mod error;
pub mod keys;
pub mod orchestrator;
pub mod portfolio;
pub mod registry;
pub mod rpc;
pub mod service;
pub mod storage;

pub use auth::{AuthGate, BiometricAuthenticator, GateState};
pub use config::WalletConfig;
pub use error::{Result, WalletError};
pub use keys::WalletKeys;
pub use orchestrator::{
    CompletedAction, LaunchParams, Orchestrator, PendingPreview, PreviewSubject, SwapParams,
    SwapSide,
};
pub use portfolio::{PortfolioAggregator, PortfolioSnapshot};
pub use registry::{WalletRecord, WalletRegistry};
pub use rpc::{ChainClient, DraftService, FlowKind, PriceService};
pub use service::WalletService;
pub use storage::{FileVault, MemoryStorage, SecureStorage};
