//! Remote Service Clients
//!
//! HTTP clients for the three external collaborators:
//! - the draft-construction service (two endpoints, one per flow)
//! - the chain RPC endpoint (submission, finality, balances)
//! - the USD price lookup service (cached, rate-limit friendly)
//!
//! Every client sits behind a trait so the orchestrator and aggregator can
//! be exercised against in-memory fakes. Remote responses are untrusted:
//! quoted totals are re-checked locally before anything is signed.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::WalletConfig;
use crate::error::{Result, WalletError};

/// Interval between finality polls.
const FINALITY_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// TTL for cached unit prices.
const PRICE_CACHE_TTL: Duration = Duration::from_secs(30);

/// JSON-RPC request ID counter
static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Which preview/confirm integration a draft belongs to.
///
/// Both flows obey the same preview/confirm contract; only the remote
/// endpoint and the parameter shape differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowKind {
    /// Token launch that seeds a liquidity pool.
    PoolCreation,
    /// Direct mint against an existing pool.
    DirectMint,
}

impl std::fmt::Display for FlowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowKind::PoolCreation => write!(f, "pool-creation"),
            FlowKind::DirectMint => write!(f, "direct-mint"),
        }
    }
}

/// Request sent to the draft-construction service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftRequest {
    /// Address of the wallet that will pay.
    pub spender_address: String,

    /// Ephemeral identity for the asset this draft introduces.
    pub ephemeral_address: String,

    /// The human-readable parameters the preview is computed from.
    pub human_parameters: Value,

    /// Flow-specific integration parameters.
    pub integration_params: Value,
}

/// Fee quote attached to a draft.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuotedFees {
    /// Network fee in base units.
    pub network_fee: u64,
    /// Service fee in base units.
    pub service_fee: u64,
}

/// Amount totals attached to a draft.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuotedTotals {
    /// Amount being spent, in base units, excluding fees.
    pub amount: u64,
    /// Grand total as quoted by the service. Re-checked locally.
    pub total: u64,
}

/// Response from the draft-construction service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftResponse {
    /// Unsigned transaction payload, base64 encoded.
    pub unsigned_payload_base64: String,

    pub quoted_fees: QuotedFees,
    pub quoted_totals: QuotedTotals,
}

/// One token position as reported by the chain.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    /// Asset (mint) identifier, base-58.
    pub asset_id: String,
    /// Balance in the asset's base units.
    pub amount: u64,
    /// Decimal places of the asset.
    pub decimals: u8,
}

/// Draft-construction service, one endpoint per flow.
#[async_trait]
pub trait DraftService: Send + Sync {
    async fn build_draft(&self, flow: FlowKind, request: &DraftRequest) -> Result<DraftResponse>;
}

/// Chain access: submission, finality, balances.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Submit a signed payload. Returns the on-chain identifier.
    async fn submit(&self, signed_payload: &[u8]) -> Result<String>;

    /// Block until the network reports finality or failure for `tx_id`.
    /// Bounded by its own deadline, distinct from the submission timeout.
    async fn await_finality(&self, tx_id: &str) -> Result<()>;

    /// Native-asset balance of `address` in base units.
    async fn native_balance(&self, address: &str) -> Result<u64>;

    /// Asset identifiers with a balance owned by `address`.
    async fn owned_assets(&self, address: &str) -> Result<Vec<String>>;

    /// Balance of one asset for `address`.
    async fn token_balance(&self, address: &str, asset_id: &str) -> Result<TokenBalance>;
}

/// USD unit-price lookups, keyed by asset identifier.
#[async_trait]
pub trait PriceService: Send + Sync {
    async fn unit_price_usd(&self, asset_id: &str) -> Result<f64>;
}

// ============================================================================
// HTTP implementations
// ============================================================================

/// HTTP client for the draft-construction service.
pub struct HttpDraftService {
    client: reqwest::Client,
    pool_creation_endpoint: String,
    direct_mint_endpoint: String,
}

impl HttpDraftService {
    pub fn new(config: &WalletConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.request_timeout())?,
            pool_creation_endpoint: config.pool_creation_endpoint.clone(),
            direct_mint_endpoint: config.direct_mint_endpoint.clone(),
        })
    }

    fn endpoint(&self, flow: FlowKind) -> &str {
        match flow {
            FlowKind::PoolCreation => &self.pool_creation_endpoint,
            FlowKind::DirectMint => &self.direct_mint_endpoint,
        }
    }
}

/// Error body shape shared by the remote services.
#[derive(Debug, Deserialize)]
struct RemoteErrorBody {
    error: String,
}

#[async_trait]
impl DraftService for HttpDraftService {
    async fn build_draft(&self, flow: FlowKind, request: &DraftRequest) -> Result<DraftResponse> {
        let endpoint = self.endpoint(flow);
        debug!(%flow, %endpoint, "requesting transaction draft");

        let response = self.client.post(endpoint).json(request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            // A parseable error body is a considered rejection; anything
            // else is a transport-level failure.
            if let Ok(body) = response.json::<RemoteErrorBody>().await {
                return Err(WalletError::RemoteRejected(body.error));
            }
            return Err(WalletError::Network(format!("draft service HTTP {status}")));
        }

        let draft: DraftResponse = response
            .json()
            .await
            .map_err(|e| WalletError::Network(format!("malformed draft response: {e}")))?;
        Ok(draft)
    }
}

/// JSON-RPC 2.0 request
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    method: String,
    params: Value,
    id: u64,
}

/// JSON-RPC 2.0 response
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

/// JSON-RPC error
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

/// HTTP JSON-RPC chain client.
pub struct HttpChainClient {
    client: reqwest::Client,
    endpoint: String,
    finality_timeout: Duration,
}

/// Status of a submitted transaction, as reported by the chain.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureStatus {
    /// "pending", "finalized" or "failed"
    status: String,
    /// Raw program log lines, present on failure.
    #[serde(default)]
    logs: Vec<String>,
    /// Failure description, present on failure.
    #[serde(default)]
    error: Option<String>,
}

impl HttpChainClient {
    pub fn new(config: &WalletConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.request_timeout())?,
            endpoint: config.rpc_endpoint.clone(),
            finality_timeout: config.finality_timeout(),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
            id: REQUEST_ID.fetch_add(1, Ordering::SeqCst),
        };

        let response = self.client.post(&self.endpoint).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(WalletError::Network(format!(
                "chain RPC HTTP {}",
                response.status()
            )));
        }

        let body: JsonRpcResponse<T> = response
            .json()
            .await
            .map_err(|e| WalletError::Network(format!("malformed RPC response: {e}")))?;

        if let Some(error) = body.error {
            return Err(WalletError::RemoteRejected(format!(
                "RPC error {}: {}",
                error.code, error.message
            )));
        }

        body.result
            .ok_or_else(|| WalletError::Network("missing result in RPC response".into()))
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn submit(&self, signed_payload: &[u8]) -> Result<String> {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(signed_payload);

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct SubmitResult {
            tx_id: String,
        }

        let result: SubmitResult = self
            .call("sendTransaction", json!({ "payload": encoded }))
            .await?;
        debug!(tx_id = %result.tx_id, "transaction submitted");
        Ok(result.tx_id)
    }

    async fn await_finality(&self, tx_id: &str) -> Result<()> {
        let deadline = Instant::now() + self.finality_timeout;

        loop {
            let status: SignatureStatus = self
                .call("getSignatureStatus", json!({ "txId": tx_id }))
                .await?;

            match status.status.as_str() {
                "finalized" => return Ok(()),
                "failed" => {
                    return Err(WalletError::OnChainFailure {
                        message: status
                            .error
                            .unwrap_or_else(|| "transaction rejected by the ledger".into()),
                        logs: status.logs,
                    });
                }
                _ => {
                    if Instant::now() + FINALITY_POLL_INTERVAL > deadline {
                        warn!(%tx_id, "finality polling deadline elapsed");
                        return Err(WalletError::Timeout);
                    }
                    tokio::time::sleep(FINALITY_POLL_INTERVAL).await;
                }
            }
        }
    }

    async fn native_balance(&self, address: &str) -> Result<u64> {
        #[derive(Deserialize)]
        struct BalanceResult {
            balance: u64,
        }

        let result: BalanceResult = self
            .call("getBalance", json!({ "address": address }))
            .await?;
        Ok(result.balance)
    }

    async fn owned_assets(&self, address: &str) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct AssetsResult {
            asset_ids: Vec<String>,
        }

        let result: AssetsResult = self
            .call("getOwnedAssets", json!({ "address": address }))
            .await?;
        Ok(result.asset_ids)
    }

    async fn token_balance(&self, address: &str, asset_id: &str) -> Result<TokenBalance> {
        self.call(
            "getTokenBalance",
            json!({ "address": address, "assetId": asset_id }),
        )
        .await
    }
}

/// HTTP price service with a short in-memory cache.
///
/// The upstream service is rate-limited; repeated refreshes inside the TTL
/// are served from cache.
pub struct HttpPriceService {
    client: reqwest::Client,
    endpoint: String,
    cache: Mutex<HashMap<String, (f64, Instant)>>,
}

impl HttpPriceService {
    pub fn new(config: &WalletConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.request_timeout())?,
            endpoint: config.price_endpoint.clone(),
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn cached(&self, asset_id: &str) -> Option<f64> {
        let cache = self.cache.lock().ok()?;
        match cache.get(asset_id) {
            Some((price, fetched_at)) if fetched_at.elapsed() < PRICE_CACHE_TTL => Some(*price),
            _ => None,
        }
    }

    fn store(&self, asset_id: &str, price: f64) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(asset_id.to_string(), (price, Instant::now()));
        }
    }
}

#[async_trait]
impl PriceService for HttpPriceService {
    async fn unit_price_usd(&self, asset_id: &str) -> Result<f64> {
        if let Some(price) = self.cached(asset_id) {
            return Ok(price);
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct PriceResult {
            price_usd: f64,
        }

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("id", asset_id)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(WalletError::Network(format!(
                "price service HTTP {}",
                response.status()
            )));
        }

        let result: PriceResult = response
            .json()
            .await
            .map_err(|e| WalletError::Network(format!("malformed price response: {e}")))?;

        self.store(asset_id, result.price_usd);
        Ok(result.price_usd)
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| WalletError::Network(format!("failed to create HTTP client: {e}")))
}
