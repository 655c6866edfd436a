//! Transaction Preview/Confirm Orchestration
//!
//! Every outgoing transaction goes through two phases: `preview` fetches an
//! unsigned draft and its quoted cost from the remote construction service,
//! and `confirm` signs and broadcasts exactly that draft. The user never
//! signs anything whose cost was not shown first.
//!
//! The ephemeral signer is generated at preview time and bound to the
//! draft: regenerating it at confirm time would silently invalidate the
//! quote. At most one preview is pending at a time; starting a new one
//! replaces an unconfirmed predecessor, it never queues behind it.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::WalletConfig;
use crate::error::{Result, WalletError};
use crate::keys::{EphemeralSigner, WalletKeys};
use crate::registry::WalletRecord;
use crate::rpc::{ChainClient, DraftRequest, DraftService, FlowKind, QuotedFees, QuotedTotals};

/// Maximum length of a token name.
const MAX_NAME_LEN: usize = 32;

/// Maximum length of a token symbol.
const MAX_SYMBOL_LEN: usize = 10;

/// Parameters for launching a token with a seeded liquidity pool.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchParams {
    pub name: String,
    pub symbol: String,
    pub description: String,
    /// Optional initial buy in native base units, on top of launch fees.
    pub initial_buy: u64,
}

/// Buy or sell side of a swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapSide {
    Buy,
    Sell,
}

/// Parameters for a direct-mint swap against an existing pool.
#[derive(Debug, Clone, Serialize)]
pub struct SwapParams {
    /// Asset (mint) identifier, base-58.
    pub asset_id: String,
    pub side: SwapSide,
    /// Amount in base units: native units for a buy, token units for a sell.
    pub amount: u64,
}

/// The subject of a preview: which flow, with which human parameters.
///
/// Both variants obey the same preview/confirm contract; only the remote
/// endpoint and the parameter shape differ, so `confirm` dispatches on the
/// variant instead of sniffing an untyped blob.
#[derive(Debug, Clone)]
pub enum PreviewSubject {
    PoolCreation(LaunchParams),
    DirectMint(SwapParams),
}

impl PreviewSubject {
    pub fn flow(&self) -> FlowKind {
        match self {
            PreviewSubject::PoolCreation(_) => FlowKind::PoolCreation,
            PreviewSubject::DirectMint(_) => FlowKind::DirectMint,
        }
    }

    /// Local parameter validation. Runs before any network access.
    fn validate(&self) -> Result<()> {
        match self {
            PreviewSubject::PoolCreation(params) => {
                if params.name.trim().is_empty() || params.name.len() > MAX_NAME_LEN {
                    return Err(WalletError::validation(format!(
                        "token name must be 1-{MAX_NAME_LEN} characters"
                    )));
                }
                if params.symbol.trim().is_empty() || params.symbol.len() > MAX_SYMBOL_LEN {
                    return Err(WalletError::validation(format!(
                        "token symbol must be 1-{MAX_SYMBOL_LEN} characters"
                    )));
                }
                Ok(())
            }
            PreviewSubject::DirectMint(params) => {
                let decoded = bs58::decode(&params.asset_id)
                    .into_vec()
                    .map_err(|_| WalletError::validation("asset id is not valid base-58"))?;
                if decoded.len() != 32 {
                    return Err(WalletError::validation("asset id must decode to 32 bytes"));
                }
                if params.amount == 0 {
                    return Err(WalletError::validation("swap amount must be greater than zero"));
                }
                Ok(())
            }
        }
    }

    /// Human-readable parameters, as sent to the draft service and kept on
    /// the pending preview for display.
    fn human_parameters(&self) -> Value {
        match self {
            PreviewSubject::PoolCreation(params) => json!({
                "name": params.name,
                "symbol": params.symbol,
                "description": params.description,
                "initialBuy": params.initial_buy,
            }),
            PreviewSubject::DirectMint(params) => json!({
                "assetId": params.asset_id,
                "side": params.side,
                "amount": params.amount,
            }),
        }
    }

    /// Flow-specific integration parameters for the draft service.
    fn integration_params(&self) -> Value {
        match self {
            PreviewSubject::PoolCreation(_) => json!({ "seedPool": true }),
            PreviewSubject::DirectMint(params) => json!({ "assetId": params.asset_id }),
        }
    }

    /// One-line description for the completed-action history.
    fn describe(&self) -> String {
        match self {
            PreviewSubject::PoolCreation(params) => {
                format!("launch {} ({})", params.name, params.symbol)
            }
            PreviewSubject::DirectMint(params) => match params.side {
                SwapSide::Buy => format!("buy {}", params.asset_id),
                SwapSide::Sell => format!("sell {}", params.asset_id),
            },
        }
    }
}

/// The single live pending preview.
pub struct PendingPreview {
    /// What the preview was computed from.
    pub subject: PreviewSubject,
    /// Quote returned by the draft service.
    pub quoted_fees: QuotedFees,
    pub quoted_totals: QuotedTotals,
    /// Locally recomputed total the spender must cover. The remote quote is
    /// untrusted; this is the number the sufficiency check uses.
    pub required_total: u64,
    /// Wallet address the draft was quoted against. A preview never
    /// retargets to a different wallet.
    pub spender_address: String,
    pub created_at: DateTime<Utc>,
    /// Single-use signer bound to this draft.
    ephemeral: EphemeralSigner,
    /// Decoded unsigned payload from the draft service.
    unsigned_payload: Vec<u8>,
}

impl PendingPreview {
    pub fn flow(&self) -> FlowKind {
        self.subject.flow()
    }
}

impl std::fmt::Debug for PendingPreview {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingPreview")
            .field("flow", &self.flow())
            .field("required_total", &self.required_total)
            .field("spender_address", &self.spender_address)
            .finish_non_exhaustive()
    }
}

/// A confirmed, finalized action.
#[derive(Debug, Clone)]
pub struct CompletedAction {
    /// On-chain identifier of the finalized transaction.
    pub tx_id: String,
    /// Human-facing explorer link.
    pub explorer_link: String,
    pub flow: FlowKind,
    pub description: String,
    pub completed_at: DateTime<Utc>,
}

/// Wallet identity the orchestrator is currently bound to.
struct BoundWallet {
    address: String,
    keys: WalletKeys,
}

/// Envelope submitted to the network: the payload plus its signatures.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignedEnvelope<'a> {
    payload_base64: &'a str,
    signatures: Vec<EnvelopeSignature>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeSignature {
    signer: String,
    signature_base58: String,
}

/// The preview/confirm orchestrator for one wallet session.
pub struct Orchestrator {
    drafts: Arc<dyn DraftService>,
    chain: Arc<dyn ChainClient>,
    config: WalletConfig,
    wallet: Option<BoundWallet>,
    pending: Option<PendingPreview>,
    completed: Vec<CompletedAction>,
}

impl Orchestrator {
    pub fn new(
        drafts: Arc<dyn DraftService>,
        chain: Arc<dyn ChainClient>,
        config: WalletConfig,
    ) -> Self {
        Self {
            drafts,
            chain,
            config,
            wallet: None,
            pending: None,
            completed: Vec::new(),
        }
    }

    /// Bind to the active wallet. Any pending preview was quoted against
    /// the previous wallet and is discarded rather than retargeted.
    pub fn bind_wallet(&mut self, record: &WalletRecord) {
        if self.pending.take().is_some() {
            debug!("pending preview discarded on wallet switch");
        }
        self.wallet = Some(BoundWallet {
            address: record.public_address.clone(),
            keys: record.keys().clone(),
        });
    }

    /// Request a draft and hold it as the one live pending preview.
    ///
    /// Local validation runs first, without network access. A previously
    /// pending preview for this flow is discarded, not merged; if the draft
    /// request fails or times out, no pending state is left behind.
    /// `known_balance` is the spending wallet's latest known native balance
    /// in base units; the sufficiency verdict is recorded on the preview
    /// and re-checked at confirm time.
    pub async fn preview(
        &mut self,
        subject: PreviewSubject,
        known_balance: u64,
    ) -> Result<&PendingPreview> {
        subject.validate()?;

        let wallet = self
            .wallet
            .as_ref()
            .ok_or_else(|| WalletError::validation("no active wallet bound"))?;

        // Replace-not-queue: the old preview dies as soon as a new one
        // starts, and a failed request leaves none at all.
        self.pending = None;

        let ephemeral = EphemeralSigner::generate();
        let request = DraftRequest {
            spender_address: wallet.address.clone(),
            ephemeral_address: ephemeral.public_address(),
            human_parameters: subject.human_parameters(),
            integration_params: subject.integration_params(),
        };

        let draft = self.drafts.build_draft(subject.flow(), &request).await?;

        let unsigned_payload = base64::engine::general_purpose::STANDARD
            .decode(&draft.unsigned_payload_base64)
            .map_err(|_| {
                WalletError::RemoteRejected("draft payload is not valid base64".into())
            })?;

        // The service quote is untrusted input: recompute the required
        // total from its parts and take whichever is larger.
        let recomputed = draft
            .quoted_totals
            .amount
            .checked_add(draft.quoted_fees.network_fee)
            .and_then(|sum| sum.checked_add(draft.quoted_fees.service_fee))
            .ok_or_else(|| WalletError::RemoteRejected("quoted cost overflows".into()))?;
        let required_total = recomputed.max(draft.quoted_totals.total);

        if known_balance < required_total {
            debug!(
                required_total,
                known_balance, "preview quoted above known balance; confirm will be refused"
            );
        }

        let pending = self.pending.insert(PendingPreview {
            subject,
            quoted_fees: draft.quoted_fees,
            quoted_totals: draft.quoted_totals,
            required_total,
            spender_address: wallet.address.clone(),
            created_at: Utc::now(),
            ephemeral,
            unsigned_payload,
        });
        info!(flow = %pending.flow(), required_total, "preview ready");
        Ok(pending)
    }

    /// Sign, submit and finalize the pending preview.
    ///
    /// The payload is signed by both the ephemeral signer (the asset
    /// identity the draft introduces) and the wallet key (spend
    /// authorization). Failure handling is deliberately asymmetric:
    ///
    /// - insufficient funds: refused locally, preview kept, no network I/O;
    /// - submission never reached the network: preview kept for retry
    ///   without re-quoting;
    /// - the network accepted submission but finality failed or timed out:
    ///   preview cleared (it must not be replayed blindly) and the caller
    ///   is pointed at the on-chain identifier.
    pub async fn confirm(&mut self, known_balance: u64) -> Result<CompletedAction> {
        let pending = self.pending.take().ok_or(WalletError::NoPendingPreview)?;

        if known_balance < pending.required_total {
            let required = pending.required_total;
            self.pending = Some(pending);
            return Err(WalletError::InsufficientFunds {
                required,
                available: known_balance,
            });
        }

        let Some(wallet) = self.wallet.as_ref() else {
            self.pending = Some(pending);
            return Err(WalletError::validation("no active wallet bound"));
        };

        // Two-signer pattern: ephemeral first (asset identity), wallet
        // second (spend authorization).
        let payload_base64 =
            base64::engine::general_purpose::STANDARD.encode(&pending.unsigned_payload);
        let envelope = SignedEnvelope {
            payload_base64: &payload_base64,
            signatures: vec![
                EnvelopeSignature {
                    signer: pending.ephemeral.public_address(),
                    signature_base58: bs58::encode(
                        pending.ephemeral.sign(&pending.unsigned_payload),
                    )
                    .into_string(),
                },
                EnvelopeSignature {
                    signer: wallet.keys.public_address(),
                    signature_base58: bs58::encode(wallet.keys.sign(&pending.unsigned_payload))
                        .into_string(),
                },
            ],
        };
        let signed_payload = match serde_json::to_vec(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.pending = Some(pending);
                return Err(WalletError::validation(format!(
                    "failed to encode envelope: {e}"
                )));
            }
        };

        // Submission failure puts the preview back: nothing reached the
        // ledger, so retrying without a fresh quote is safe. From a
        // successful submit onward the network has the transaction and the
        // preview must not survive to be replayed.
        let tx_id = match self.chain.submit(&signed_payload).await {
            Ok(tx_id) => tx_id,
            Err(err) => {
                self.pending = Some(pending);
                return Err(err);
            }
        };

        match self.chain.await_finality(&tx_id).await {
            Ok(()) => {
                let action = CompletedAction {
                    explorer_link: self.config.explorer_link(&tx_id),
                    tx_id,
                    flow: pending.flow(),
                    description: pending.subject.describe(),
                    completed_at: Utc::now(),
                };
                info!(tx_id = %action.tx_id, flow = %action.flow, "transaction finalized");
                self.completed.push(action.clone());
                Ok(action)
            }
            Err(WalletError::OnChainFailure { message, logs }) => {
                warn!(%tx_id, %message, "ledger rejected the transaction");
                Err(WalletError::OnChainFailure { message, logs })
            }
            Err(err) => {
                warn!(%tx_id, error = %err, "finality not observed");
                Err(WalletError::Network(format!(
                    "submitted as {tx_id} but finality was not observed; \
                     check the transaction before retrying"
                )))
            }
        }
    }

    /// Drop the pending preview, e.g. when the originating form changes.
    pub fn discard(&mut self) {
        if self.pending.take().is_some() {
            debug!("pending preview discarded");
        }
    }

    /// The live pending preview, if any.
    pub fn pending(&self) -> Option<&PendingPreview> {
        self.pending.as_ref()
    }

    /// Finalized actions, oldest first.
    pub fn completed_actions(&self) -> &[CompletedAction] {
        &self.completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WalletRegistry;
    use crate::rpc::DraftResponse;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Draft service stub returning a configurable quote.
    struct StubDrafts {
        amount: u64,
        network_fee: u64,
        service_fee: u64,
        fail: bool,
        calls: AtomicUsize,
    }

    impl StubDrafts {
        fn quoting(amount: u64, network_fee: u64, service_fee: u64) -> Self {
            Self {
                amount,
                network_fee,
                service_fee,
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DraftService for StubDrafts {
        async fn build_draft(
            &self,
            _flow: FlowKind,
            _request: &DraftRequest,
        ) -> crate::error::Result<DraftResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(WalletError::Timeout);
            }
            Ok(DraftResponse {
                unsigned_payload_base64: base64::engine::general_purpose::STANDARD
                    .encode(b"unsigned-draft"),
                quoted_fees: QuotedFees {
                    network_fee: self.network_fee,
                    service_fee: self.service_fee,
                },
                quoted_totals: QuotedTotals {
                    amount: self.amount,
                    total: self.amount + self.network_fee + self.service_fee,
                },
            })
        }
    }

    /// What the chain stub should do at each step.
    enum ChainBehavior {
        Finalize,
        RejectOnChain,
        FailSubmission,
        TimeoutFinality,
    }

    struct StubChain {
        behavior: ChainBehavior,
        submissions: Mutex<Vec<Vec<u8>>>,
    }

    impl StubChain {
        fn new(behavior: ChainBehavior) -> Self {
            Self {
                behavior,
                submissions: Mutex::new(Vec::new()),
            }
        }

        fn submission_count(&self) -> usize {
            self.submissions.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChainClient for StubChain {
        async fn submit(&self, signed_payload: &[u8]) -> crate::error::Result<String> {
            if matches!(self.behavior, ChainBehavior::FailSubmission) {
                return Err(WalletError::Network("connection refused".into()));
            }
            self.submissions.lock().unwrap().push(signed_payload.to_vec());
            Ok("tx-123".to_string())
        }

        async fn await_finality(&self, _tx_id: &str) -> crate::error::Result<()> {
            match self.behavior {
                ChainBehavior::Finalize => Ok(()),
                ChainBehavior::RejectOnChain => Err(WalletError::OnChainFailure {
                    message: "custom program error: 0x1".into(),
                    logs: vec!["Program log: insufficient lamports".into()],
                }),
                ChainBehavior::TimeoutFinality => Err(WalletError::Timeout),
                ChainBehavior::FailSubmission => unreachable!(),
            }
        }

        async fn native_balance(&self, _address: &str) -> crate::error::Result<u64> {
            unimplemented!("not used by the orchestrator")
        }

        async fn owned_assets(&self, _address: &str) -> crate::error::Result<Vec<String>> {
            unimplemented!("not used by the orchestrator")
        }

        async fn token_balance(
            &self,
            _address: &str,
            _asset_id: &str,
        ) -> crate::error::Result<crate::rpc::TokenBalance> {
            unimplemented!("not used by the orchestrator")
        }
    }

    fn wallet_record() -> WalletRecord {
        let mut registry = WalletRegistry::load(Arc::new(MemoryStorage::new())).unwrap();
        registry.create("Test").unwrap().0
    }

    fn launch_subject() -> PreviewSubject {
        PreviewSubject::PoolCreation(LaunchParams {
            name: "Ember Token".into(),
            symbol: "EMB".into(),
            description: "a test token".into(),
            initial_buy: 0,
        })
    }

    fn swap_subject() -> PreviewSubject {
        PreviewSubject::DirectMint(SwapParams {
            asset_id: bs58::encode([7u8; 32]).into_string(),
            side: SwapSide::Buy,
            amount: 1_000,
        })
    }

    fn orchestrator(drafts: StubDrafts, chain: StubChain) -> (Orchestrator, Arc<StubChain>) {
        let chain = Arc::new(chain);
        let mut orchestrator =
            Orchestrator::new(Arc::new(drafts), chain.clone(), WalletConfig::default());
        orchestrator.bind_wallet(&wallet_record());
        (orchestrator, chain)
    }

    #[tokio::test]
    async fn test_preview_stores_single_pending() {
        let (mut orch, _) = orchestrator(
            StubDrafts::quoting(1_000, 50, 10),
            StubChain::new(ChainBehavior::Finalize),
        );

        orch.preview(launch_subject(), 10_000).await.unwrap();
        let first_created = orch.pending().unwrap().created_at;

        // A second preview replaces the first, never queues behind it
        orch.preview(swap_subject(), 10_000).await.unwrap();
        let pending = orch.pending().unwrap();
        assert_eq!(pending.flow(), FlowKind::DirectMint);
        assert!(pending.created_at >= first_created);
    }

    #[tokio::test]
    async fn test_preview_validates_locally_before_network() {
        let (mut orch, _) = orchestrator(
            StubDrafts::quoting(1_000, 50, 10),
            StubChain::new(ChainBehavior::Finalize),
        );

        let bad = PreviewSubject::DirectMint(SwapParams {
            asset_id: "not-base58-!!".into(),
            side: SwapSide::Buy,
            amount: 0,
        });
        let err = orch.preview(bad, 10_000).await.unwrap_err();
        assert!(matches!(err, WalletError::Validation(_)));
        // The draft service was never contacted
        assert!(orch.pending().is_none());
    }

    #[tokio::test]
    async fn test_failed_preview_leaves_no_pending() {
        let drafts = StubDrafts {
            fail: true,
            ..StubDrafts::quoting(1_000, 50, 10)
        };
        let (mut orch, _) = orchestrator(drafts, StubChain::new(ChainBehavior::Finalize));

        let err = orch.preview(launch_subject(), 10_000).await.unwrap_err();
        assert!(matches!(err, WalletError::Timeout));
        assert!(orch.pending().is_none());
    }

    #[tokio::test]
    async fn test_confirm_without_preview() {
        let (mut orch, chain) = orchestrator(
            StubDrafts::quoting(1_000, 50, 10),
            StubChain::new(ChainBehavior::Finalize),
        );

        let err = orch.confirm(10_000).await.unwrap_err();
        assert!(matches!(err, WalletError::NoPendingPreview));
        assert_eq!(chain.submission_count(), 0);
        assert!(orch.completed_actions().is_empty());
    }

    #[tokio::test]
    async fn test_confirm_refused_locally_on_insufficient_funds() {
        let (mut orch, chain) = orchestrator(
            StubDrafts::quoting(1_000, 50, 10),
            StubChain::new(ChainBehavior::Finalize),
        );

        orch.preview(launch_subject(), 500).await.unwrap();
        let err = orch.confirm(500).await.unwrap_err();

        match err {
            WalletError::InsufficientFunds {
                required,
                available,
            } => {
                assert_eq!(required, 1_060);
                assert_eq!(available, 500);
            }
            other => panic!("expected InsufficientFunds, got {other:?}"),
        }
        // No network call was made
        assert_eq!(chain.submission_count(), 0);
    }

    #[tokio::test]
    async fn test_confirm_signs_with_both_keys_and_records_action() {
        let (mut orch, chain) = orchestrator(
            StubDrafts::quoting(1_000, 50, 10),
            StubChain::new(ChainBehavior::Finalize),
        );

        orch.preview(launch_subject(), 10_000).await.unwrap();
        let ephemeral_address = orch.pending().unwrap().ephemeral.public_address();
        let action = orch.confirm(10_000).await.unwrap();

        assert_eq!(action.tx_id, "tx-123");
        assert!(action.explorer_link.ends_with("/tx-123"));
        assert_eq!(action.flow, FlowKind::PoolCreation);
        assert!(orch.pending().is_none());
        assert_eq!(orch.completed_actions().len(), 1);

        // The envelope carries the ephemeral and the wallet signature
        let submitted = chain.submissions.lock().unwrap()[0].clone();
        let envelope: serde_json::Value = serde_json::from_slice(&submitted).unwrap();
        let signatures = envelope["signatures"].as_array().unwrap();
        assert_eq!(signatures.len(), 2);
        assert_eq!(signatures[0]["signer"], ephemeral_address);
    }

    #[tokio::test]
    async fn test_submission_failure_preserves_preview() {
        let (mut orch, _) = orchestrator(
            StubDrafts::quoting(1_000, 50, 10),
            StubChain::new(ChainBehavior::FailSubmission),
        );

        orch.preview(launch_subject(), 10_000).await.unwrap();
        let err = orch.confirm(10_000).await.unwrap_err();

        assert!(matches!(err, WalletError::Network(_)));
        // Nothing reached the network; the quote is still good for a retry
        assert!(orch.pending().is_some());
    }

    #[tokio::test]
    async fn test_onchain_rejection_clears_preview_and_surfaces_logs() {
        let (mut orch, _) = orchestrator(
            StubDrafts::quoting(1_000, 50, 10),
            StubChain::new(ChainBehavior::RejectOnChain),
        );

        orch.preview(launch_subject(), 10_000).await.unwrap();
        let err = orch.confirm(10_000).await.unwrap_err();

        match err {
            WalletError::OnChainFailure { message, logs } => {
                assert_eq!(message, "custom program error: 0x1");
                assert_eq!(logs.len(), 1);
            }
            other => panic!("expected OnChainFailure, got {other:?}"),
        }
        // The draft must not be replayed
        assert!(orch.pending().is_none());
        assert!(orch.completed_actions().is_empty());
    }

    #[tokio::test]
    async fn test_finality_timeout_clears_preview_and_names_tx() {
        let (mut orch, _) = orchestrator(
            StubDrafts::quoting(1_000, 50, 10),
            StubChain::new(ChainBehavior::TimeoutFinality),
        );

        orch.preview(launch_subject(), 10_000).await.unwrap();
        let err = orch.confirm(10_000).await.unwrap_err();

        match err {
            WalletError::Network(message) => assert!(message.contains("tx-123")),
            other => panic!("expected Network, got {other:?}"),
        }
        assert!(orch.pending().is_none());
    }

    #[tokio::test]
    async fn test_wallet_switch_discards_preview() {
        let (mut orch, _) = orchestrator(
            StubDrafts::quoting(1_000, 50, 10),
            StubChain::new(ChainBehavior::Finalize),
        );

        orch.preview(launch_subject(), 10_000).await.unwrap();
        orch.bind_wallet(&wallet_record());
        assert!(orch.pending().is_none());
    }

    #[tokio::test]
    async fn test_required_total_distrusts_low_quote() {
        // Service under-reports the grand total; the local recomputation
        // from the parts wins.
        struct LowballDrafts;

        #[async_trait]
        impl DraftService for LowballDrafts {
            async fn build_draft(
                &self,
                _flow: FlowKind,
                _request: &DraftRequest,
            ) -> crate::error::Result<DraftResponse> {
                Ok(DraftResponse {
                    unsigned_payload_base64: base64::engine::general_purpose::STANDARD
                        .encode(b"unsigned"),
                    quoted_fees: QuotedFees {
                        network_fee: 50,
                        service_fee: 10,
                    },
                    quoted_totals: QuotedTotals {
                        amount: 1_000,
                        total: 900, // lies below amount + fees
                    },
                })
            }
        }

        let mut orch = Orchestrator::new(
            Arc::new(LowballDrafts),
            Arc::new(StubChain::new(ChainBehavior::Finalize)),
            WalletConfig::default(),
        );
        orch.bind_wallet(&wallet_record());

        orch.preview(launch_subject(), 10_000).await.unwrap();
        assert_eq!(orch.pending().unwrap().required_total, 1_060);
    }

    #[tokio::test]
    async fn test_fund_and_retry_scenario() {
        // Quote totals 1.05 units while the wallet holds 1.00
        let (mut orch, _) = orchestrator(
            StubDrafts::quoting(1_000_000_000, 30_000_000, 20_000_000),
            StubChain::new(ChainBehavior::Finalize),
        );

        orch.preview(swap_subject(), 1_000_000_000).await.unwrap();
        let err = orch.confirm(1_000_000_000).await.unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds { .. }));

        // Top up to 1.10 and re-preview; confirm now succeeds
        orch.preview(swap_subject(), 1_100_000_000).await.unwrap();
        let action = orch.confirm(1_100_000_000).await.unwrap();
        assert_eq!(action.tx_id, "tx-123");
    }

    #[tokio::test]
    async fn test_discard() {
        let (mut orch, _) = orchestrator(
            StubDrafts::quoting(1_000, 50, 10),
            StubChain::new(ChainBehavior::Finalize),
        );

        orch.preview(launch_subject(), 10_000).await.unwrap();
        orch.discard();
        assert!(orch.pending().is_none());
    }
}
