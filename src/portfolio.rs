//! Portfolio Aggregation
//!
//! Merges native balance, per-asset token balances and USD pricing into one
//! consistent snapshot. Snapshots are rebuilt wholesale on every refresh,
//! never patched incrementally, so a reader can never observe a half-stale
//! view. Each per-asset lookup is isolated: a failure zeroes that asset's
//! contribution and logs a warning instead of aborting the refresh.
//!
//! Refreshes may overlap freely. Every refresh takes a monotonic sequence
//! number at its start; a slow refresh that finishes after a newer one is
//! discarded rather than allowed to overwrite the fresher snapshot.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::rpc::{ChainClient, PriceService};

/// Asset identifier under which the native asset is priced.
pub const NATIVE_ASSET_ID: &str = "native";

/// Decimal places of the native asset.
pub const NATIVE_DECIMALS: u8 = 9;

/// One priced token position.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetPosition {
    /// Balance in the asset's base units.
    pub amount: u64,
    pub decimals: u8,
    /// USD price per whole unit. Zero when the lookup failed.
    pub unit_price_usd: f64,
    /// USD value of the position. Zero when any lookup failed.
    pub value_usd: f64,
}

/// The aggregated view of one wallet at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioSnapshot {
    /// Address the snapshot was built for.
    pub address: String,
    /// Native-asset balance in base units.
    pub native_balance: u64,
    /// USD value of the native balance.
    pub native_value_usd: f64,
    /// Token positions keyed by asset identifier.
    pub assets: HashMap<String, AssetPosition>,
    /// Sum of all successfully priced contributions.
    pub total_value_usd: f64,
    pub as_of: DateTime<Utc>,
}

impl PortfolioSnapshot {
    /// An empty snapshot for a freshly bound wallet.
    fn empty(address: &str) -> Self {
        Self {
            address: address.to_string(),
            native_balance: 0,
            native_value_usd: 0.0,
            assets: HashMap::new(),
            total_value_usd: 0.0,
            as_of: Utc::now(),
        }
    }
}

/// Latest snapshot plus the sequence number of the refresh that built it.
struct SnapshotSlot {
    seq: u64,
    snapshot: Option<PortfolioSnapshot>,
}

/// The portfolio aggregator for the active wallet.
pub struct PortfolioAggregator {
    chain: Arc<dyn ChainClient>,
    prices: Arc<dyn PriceService>,
    /// Address of the wallet this aggregator is bound to.
    address: Mutex<Option<String>>,
    /// Monotonic refresh counter; the slot only accepts newer results.
    next_seq: AtomicU64,
    slot: Mutex<SnapshotSlot>,
}

impl PortfolioAggregator {
    pub fn new(chain: Arc<dyn ChainClient>, prices: Arc<dyn PriceService>) -> Self {
        Self {
            chain,
            prices,
            address: Mutex::new(None),
            next_seq: AtomicU64::new(0),
            slot: Mutex::new(SnapshotSlot {
                seq: 0,
                snapshot: None,
            }),
        }
    }

    /// Bind the aggregator to a wallet address, dropping any snapshot of a
    /// previously bound wallet. In-flight refreshes for the old wallet are
    /// invalidated: their sequence numbers predate the rebind.
    pub fn bind(&self, address: &str) {
        if let Ok(mut bound) = self.address.lock() {
            *bound = Some(address.to_string());
        }
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut slot) = self.slot.lock() {
            slot.seq = seq;
            slot.snapshot = Some(PortfolioSnapshot::empty(address));
        }
        debug!(%address, "portfolio aggregator bound");
    }

    /// The address the aggregator currently tracks.
    pub fn bound_address(&self) -> Option<String> {
        self.address.lock().ok().and_then(|a| a.clone())
    }

    /// The most recent snapshot, if any refresh has completed.
    pub fn snapshot(&self) -> Option<PortfolioSnapshot> {
        self.slot.lock().ok().and_then(|slot| slot.snapshot.clone())
    }

    /// Native balance from the latest snapshot, in base units. Zero until
    /// a refresh has completed.
    pub fn known_native_balance(&self) -> u64 {
        self.snapshot().map(|s| s.native_balance).unwrap_or(0)
    }

    /// Rebuild the snapshot from the network.
    ///
    /// Safe to invoke repeatedly or concurrently; the newest completed
    /// refresh wins. Returns the snapshot this call built, whether or not
    /// it was accepted as the stored one.
    pub async fn refresh(&self) -> Option<PortfolioSnapshot> {
        // Take the sequence number before reading the address: a rebind
        // that lands in between bumps the counter past ours, so the result
        // built for the old address cannot commit over the new binding.
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let address = self.address.lock().ok().and_then(|a| a.clone())?;

        let snapshot = self.build_snapshot(&address).await;
        self.commit(seq, snapshot.clone());
        Some(snapshot)
    }

    /// Run one full fetch cycle. Per-asset failures degrade to zero.
    async fn build_snapshot(&self, address: &str) -> PortfolioSnapshot {
        // Native balance, owned-asset enumeration and the native price are
        // independent; fetch them concurrently.
        let (native_balance, asset_ids, native_price) = tokio::join!(
            self.chain.native_balance(address),
            self.chain.owned_assets(address),
            self.prices.unit_price_usd(NATIVE_ASSET_ID),
        );

        let native_balance = native_balance.unwrap_or_else(|e| {
            warn!(%address, error = %e, "native balance lookup failed; using zero");
            0
        });
        let native_price = native_price.unwrap_or_else(|e| {
            warn!(error = %e, "native price lookup failed; using zero");
            0.0
        });
        let asset_ids = asset_ids.unwrap_or_else(|e| {
            warn!(%address, error = %e, "owned-asset enumeration failed; using empty set");
            Vec::new()
        });

        // All per-asset balance and price lookups run concurrently.
        let positions = join_all(
            asset_ids
                .iter()
                .map(|asset_id| self.fetch_position(address, asset_id)),
        )
        .await;

        let assets: HashMap<String, AssetPosition> =
            asset_ids.into_iter().zip(positions).collect();

        let native_value_usd = to_ui_amount(native_balance, NATIVE_DECIMALS) * native_price;
        let total_value_usd =
            native_value_usd + assets.values().map(|p| p.value_usd).sum::<f64>();

        PortfolioSnapshot {
            address: address.to_string(),
            native_balance,
            native_value_usd,
            assets,
            total_value_usd,
            as_of: Utc::now(),
        }
    }

    /// Fetch one asset's balance and price, concurrently. Either failure
    /// zeroes the contribution.
    async fn fetch_position(&self, address: &str, asset_id: &str) -> AssetPosition {
        let (balance, price) = tokio::join!(
            self.chain.token_balance(address, asset_id),
            self.prices.unit_price_usd(asset_id),
        );

        let (amount, decimals) = match balance {
            Ok(b) => (b.amount, b.decimals),
            Err(e) => {
                warn!(%asset_id, error = %e, "token balance lookup failed; using zero");
                (0, 0)
            }
        };
        let unit_price_usd = match price {
            Ok(p) => p,
            Err(e) => {
                warn!(%asset_id, error = %e, "price lookup failed; valuing at zero");
                0.0
            }
        };

        AssetPosition {
            amount,
            decimals,
            unit_price_usd,
            value_usd: to_ui_amount(amount, decimals) * unit_price_usd,
        }
    }

    /// Accept the result only if no newer refresh has already landed.
    fn commit(&self, seq: u64, snapshot: PortfolioSnapshot) {
        let Ok(mut slot) = self.slot.lock() else {
            return;
        };
        if seq > slot.seq {
            slot.seq = seq;
            slot.snapshot = Some(snapshot);
        } else {
            debug!(seq, newest = slot.seq, "discarding stale refresh result");
        }
    }

    /// Scheduled refresh loop. Runs until the aggregator is dropped by all
    /// other holders; intended to be spawned once by the service layer.
    pub async fn run_scheduled(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so construction and the
        // initial bind-triggered refresh do not double up.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.refresh().await;
        }
    }
}

/// Convert base units to a whole-unit amount.
fn to_ui_amount(amount: u64, decimals: u8) -> f64 {
    amount as f64 / 10f64.powi(decimals as i32)
}
