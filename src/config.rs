//! Wallet Configuration
//!
//! Endpoints and timing knobs for the remote services. Hosts may load this
//! from JSON; the defaults carry the standard timings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeout for draft construction and submission requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Overall deadline for finality polling. Longer than the request timeout
/// because on-chain confirmation can legitimately take a while.
pub const DEFAULT_FINALITY_TIMEOUT: Duration = Duration::from_secs(90);

/// Interval between scheduled portfolio refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for the wallet core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Draft-construction endpoint for the pool-creation flow.
    pub pool_creation_endpoint: String,

    /// Draft-construction endpoint for the direct-mint flow.
    pub direct_mint_endpoint: String,

    /// Chain RPC endpoint (submission, finality, balances).
    pub rpc_endpoint: String,

    /// USD price lookup endpoint.
    pub price_endpoint: String,

    /// Base URL for human-facing transaction links.
    pub explorer_base: String,

    /// Timeout for draft and submission requests, in seconds.
    pub request_timeout_secs: u64,

    /// Overall finality-polling deadline, in seconds.
    pub finality_timeout_secs: u64,

    /// Scheduled refresh interval, in seconds.
    pub refresh_interval_secs: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            pool_creation_endpoint: "https://launch.ember.example/api/create-pool".to_string(),
            direct_mint_endpoint: "https://launch.ember.example/api/mint".to_string(),
            rpc_endpoint: "https://rpc.ember.example".to_string(),
            price_endpoint: "https://price.ember.example/api/prices".to_string(),
            explorer_base: "https://explorer.ember.example/tx".to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            finality_timeout_secs: DEFAULT_FINALITY_TIMEOUT.as_secs(),
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL.as_secs(),
        }
    }
}

impl WalletConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn finality_timeout(&self) -> Duration {
        Duration::from_secs(self.finality_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Human-facing link for a confirmed transaction.
    pub fn explorer_link(&self, tx_id: &str) -> String {
        format!("{}/{}", self.explorer_base.trim_end_matches('/'), tx_id)
    }
}
