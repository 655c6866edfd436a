//! Integration tests for ember-wallet
//!
//! These tests verify end-to-end wallet functionality including:
//! - Vault and registry persistence across restarts
//! - Multi-wallet management invariants
//! - Session gating of key-touching operations
//! - Preview/confirm transaction flows
//! - Portfolio aggregation under partial failure

use async_trait::async_trait;
use base64::Engine;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use ember_wallet::{
    config::WalletConfig,
    error::{Result, WalletError},
    keys::WalletKeys,
    orchestrator::{LaunchParams, SwapParams, SwapSide},
    registry::WalletRegistry,
    rpc::{
        ChainClient, DraftRequest, DraftResponse, DraftService, FlowKind, PriceService,
        QuotedFees, QuotedTotals, TokenBalance,
    },
    service::WalletService,
    storage::{FileVault, MemoryStorage, SecureStorage},
};

// Standard BIP39 test vector (12 words)
const TEST_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
const TEST_PASSWORD: &str = "secure-test-password-123!";

/// Opt-in log output for debugging, e.g. `RUST_LOG=debug cargo test`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Shared network stubs
// ============================================================================

/// Draft service quoting a fixed amount and fees.
struct StubDrafts {
    amount: u64,
    network_fee: u64,
    service_fee: u64,
    calls: AtomicUsize,
}

impl StubDrafts {
    fn quoting(amount: u64, network_fee: u64, service_fee: u64) -> Self {
        Self {
            amount,
            network_fee,
            service_fee,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DraftService for StubDrafts {
    async fn build_draft(&self, _flow: FlowKind, _request: &DraftRequest) -> Result<DraftResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(DraftResponse {
            unsigned_payload_base64: base64::engine::general_purpose::STANDARD.encode(b"draft"),
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

/// Chain stub with a mutable native balance and a fixed asset set.
struct StubChain {
    balance: Mutex<u64>,
    assets: Vec<String>,
    submissions: AtomicUsize,
}

impl StubChain {
    fn with_balance(balance: u64) -> Self {
        Self {
            balance: Mutex::new(balance),
            assets: Vec::new(),
            submissions: AtomicUsize::new(0),
        }
    }

    fn set_balance(&self, balance: u64) {
        *self.balance.lock().unwrap() = balance;
    }
}

#[async_trait]
impl ChainClient for StubChain {
    async fn submit(&self, _signed_payload: &[u8]) -> Result<String> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        Ok("tx-integration".to_string())
    }

    async fn await_finality(&self, _tx_id: &str) -> Result<()> {
        Ok(())
    }

    async fn native_balance(&self, _address: &str) -> Result<u64> {
        Ok(*self.balance.lock().unwrap())
    }

    async fn owned_assets(&self, _address: &str) -> Result<Vec<String>> {
        Ok(self.assets.clone())
    }

    async fn token_balance(&self, _address: &str, asset_id: &str) -> Result<TokenBalance> {
        Ok(TokenBalance {
            asset_id: asset_id.to_string(),
            amount: 5_000,
            decimals: 6,
        })
    }
}

/// Price stub where named assets fail their lookup.
struct StubPrices {
    failing: HashSet<String>,
}

impl StubPrices {
    fn all_ok() -> Self {
        Self {
            failing: HashSet::new(),
        }
    }
}

#[async_trait]
impl PriceService for StubPrices {
    async fn unit_price_usd(&self, asset_id: &str) -> Result<f64> {
        if self.failing.contains(asset_id) {
            return Err(WalletError::Network("price feed unavailable".into()));
        }
        Ok(2.0)
    }
}

fn service_over(
    storage: Arc<dyn SecureStorage>,
    drafts: StubDrafts,
    chain: StubChain,
    prices: StubPrices,
) -> (WalletService, Arc<StubChain>) {
    let chain = Arc::new(chain);
    let service = WalletService::with_services(
        WalletConfig::default(),
        storage,
        Arc::new(drafts),
        chain.clone(),
        Arc::new(prices),
    )
    .unwrap();
    (service, chain)
}

fn unlocked_service(balance: u64) -> (WalletService, Arc<StubChain>) {
    let (mut service, chain) = service_over(
        Arc::new(MemoryStorage::new()),
        StubDrafts::quoting(100_000, 5_000, 1_000),
        StubChain::with_balance(balance),
        StubPrices::all_ok(),
    );
    service.set_password(TEST_PASSWORD, TEST_PASSWORD).unwrap();
    (service, chain)
}

// ============================================================================
// Vault & Persistence Tests
// ============================================================================

mod vault_persistence {
    use super::*;

    #[test]
    fn test_full_wallet_lifecycle() {
        init_tracing();
        let temp_dir = TempDir::new().unwrap();
        let vault_path = temp_dir.path().join("wallet.vault");

        // 1. Create the vault and a registry over it
        let address = {
            let vault: Arc<dyn SecureStorage> =
                Arc::new(FileVault::create(&vault_path, TEST_PASSWORD).unwrap());
            let mut registry = WalletRegistry::load(Arc::clone(&vault)).unwrap();
            let (record, phrase) = registry.create("Main").unwrap();

            // The phrase recovers the same address independently
            let rederived = WalletKeys::from_mnemonic(&phrase).unwrap();
            assert_eq!(rederived.public_address(), record.public_address);
            record.public_address
        };

        // 2. Reopen from disk with the right password
        let vault: Arc<dyn SecureStorage> =
            Arc::new(FileVault::open(&vault_path, TEST_PASSWORD).unwrap());
        let registry = WalletRegistry::load(vault).unwrap();

        let active = registry.active().unwrap();
        assert_eq!(active.public_address, address);
        // The persisted record carries the key but never the phrase
        assert!(active.keys().mnemonic_phrase().is_none());
    }

    #[test]
    fn test_wrong_password_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let vault_path = temp_dir.path().join("wallet.vault");

        FileVault::create(&vault_path, TEST_PASSWORD).unwrap();
        assert!(FileVault::open(&vault_path, "not-the-password").is_err());
    }

    #[test]
    fn test_vault_file_is_ciphertext() {
        let temp_dir = TempDir::new().unwrap();
        let vault_path = temp_dir.path().join("wallet.vault");

        let vault = FileVault::create(&vault_path, TEST_PASSWORD).unwrap();
        let registry_storage: Arc<dyn SecureStorage> = Arc::new(vault);
        let mut registry = WalletRegistry::load(Arc::clone(&registry_storage)).unwrap();
        let (record, _) = registry.create("Main").unwrap();

        let raw = std::fs::read_to_string(&vault_path).unwrap();
        assert!(!raw.contains(&record.public_address));
        assert!(!raw.contains("Main"));
    }

    #[test]
    fn test_password_change_preserves_wallets() {
        let temp_dir = TempDir::new().unwrap();
        let vault_path = temp_dir.path().join("wallet.vault");
        let new_password = "brand-new-password-456!";

        let address = {
            let vault = Arc::new(FileVault::create(&vault_path, TEST_PASSWORD).unwrap());
            let storage: Arc<dyn SecureStorage> = vault.clone();
            let mut registry = WalletRegistry::load(storage).unwrap();
            let (record, _) = registry.create("Main").unwrap();

            // Re-key while the vault is live
            vault.change_password(TEST_PASSWORD, new_password).unwrap();
            record.public_address
        };

        let vault: Arc<dyn SecureStorage> =
            Arc::new(FileVault::open(&vault_path, new_password).unwrap());
        let registry = WalletRegistry::load(vault).unwrap();
        assert_eq!(registry.active().unwrap().public_address, address);
    }
}

// ============================================================================
// Registry Invariant Tests
// ============================================================================

mod registry_invariants {
    use super::*;

    fn exactly_one_active(registry: &WalletRegistry) {
        assert_eq!(
            registry.wallets().iter().filter(|w| w.is_active).count(),
            1
        );
    }

    #[test]
    fn test_exactly_one_active_across_sequences() {
        let mut registry = WalletRegistry::load(Arc::new(MemoryStorage::new())).unwrap();

        let (a, _) = registry.create("A").unwrap();
        exactly_one_active(&registry);

        let (b, _) = registry.create("B").unwrap();
        exactly_one_active(&registry);
        // Creating a second wallet does not steal the active marker
        assert_eq!(registry.active().unwrap().id, a.id);

        registry.switch_active(&b.id).unwrap();
        exactly_one_active(&registry);

        let imported = registry.import("C", TEST_MNEMONIC).unwrap();
        registry.switch_active(&imported.id).unwrap();
        registry.remove(&a.id).unwrap();
        exactly_one_active(&registry);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_cannot_remove_active() {
        let mut registry = WalletRegistry::load(Arc::new(MemoryStorage::new())).unwrap();
        let (a, _) = registry.create("A").unwrap();
        registry.create("B").unwrap();

        let err = registry.remove(&a.id).unwrap_err();
        assert!(matches!(err, WalletError::CannotRemoveActive));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_cannot_remove_last() {
        let mut registry = WalletRegistry::load(Arc::new(MemoryStorage::new())).unwrap();
        let (only, _) = registry.create("Only").unwrap();

        // The sole wallet is also active; the emptiness rule wins
        let err = registry.remove(&only.id).unwrap_err();
        assert!(matches!(err, WalletError::CannotRemoveLast));
    }

    #[test]
    fn test_duplicate_import_rejected() {
        let mut registry = WalletRegistry::load(Arc::new(MemoryStorage::new())).unwrap();
        registry.import("First", TEST_MNEMONIC).unwrap();

        let err = registry.import("Second", TEST_MNEMONIC).unwrap_err();
        assert!(matches!(err, WalletError::DuplicateWallet));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unparseable_import_is_hard_error() {
        let mut registry = WalletRegistry::load(Arc::new(MemoryStorage::new())).unwrap();
        let before = registry.len();

        let err = registry.import("Bad", "definitely not a key").unwrap_err();
        assert!(matches!(err, WalletError::Validation(_)));
        // Never silently minted a fresh wallet instead
        assert_eq!(registry.len(), before);
    }
}

// ============================================================================
// Session Gate Tests
// ============================================================================

mod session_gate {
    use super::*;

    #[test]
    fn test_restart_requires_fresh_unlock() {
        let storage: Arc<dyn SecureStorage> = Arc::new(MemoryStorage::new());

        {
            let (mut service, _) = service_over(
                Arc::clone(&storage),
                StubDrafts::quoting(1, 1, 1),
                StubChain::with_balance(0),
                StubPrices::all_ok(),
            );
            service.set_password(TEST_PASSWORD, TEST_PASSWORD).unwrap();
            service.create_wallet("Main").unwrap();
            assert!(service.is_unlocked());
        }

        // Same storage, new process: wallets survive, the session does not
        let (mut service, _) = service_over(
            storage,
            StubDrafts::quoting(1, 1, 1),
            StubChain::with_balance(0),
            StubPrices::all_ok(),
        );
        assert!(!service.is_unlocked());
        assert_eq!(service.wallets().len(), 1);
        assert!(matches!(
            service.create_wallet("Blocked").unwrap_err(),
            WalletError::Locked
        ));

        service.unlock(TEST_PASSWORD).unwrap();
        service.create_wallet("Second").unwrap();
    }

    #[test]
    fn test_wrong_password_is_opaque() {
        let (mut service, _) = unlocked_service(0);
        service.lock();

        let err = service.unlock("wrong-password-entirely").unwrap_err();
        assert!(matches!(err, WalletError::AuthenticationFailed));
    }
}

// ============================================================================
// Transaction Flow Tests
// ============================================================================

mod transaction_flows {
    use super::*;

    fn launch() -> LaunchParams {
        LaunchParams {
            name: "Ember Token".into(),
            symbol: "EMB".into(),
            description: "integration test token".into(),
            initial_buy: 0,
        }
    }

    #[tokio::test]
    async fn test_launch_preview_confirm() {
        init_tracing();
        let (mut service, chain) = unlocked_service(1_000_000);
        service.create_wallet("Main").unwrap();
        service.refresh_portfolio().await.unwrap();

        let preview = service.preview_launch(launch()).await.unwrap();
        assert_eq!(preview.required_total, 106_000);

        let action = service.confirm().await.unwrap();
        assert_eq!(action.tx_id, "tx-integration");
        assert_eq!(action.flow, FlowKind::PoolCreation);
        assert!(action.explorer_link.contains(&action.tx_id));
        assert_eq!(chain.submissions.load(Ordering::SeqCst), 1);
        assert!(service.pending_preview().is_none());
    }

    #[tokio::test]
    async fn test_second_preview_replaces_first() {
        let (mut service, _) = unlocked_service(1_000_000);
        service.create_wallet("Main").unwrap();
        service.refresh_portfolio().await;

        service.preview_launch(launch()).await.unwrap();
        service
            .preview_swap(SwapParams {
                asset_id: bs58::encode([3u8; 32]).into_string(),
                side: SwapSide::Buy,
                amount: 50_000,
            })
            .await
            .unwrap();

        // Only the latest preview is pending; confirming resolves it alone
        assert_eq!(service.pending_preview().unwrap().flow(), FlowKind::DirectMint);
        service.confirm().await.unwrap();
        assert_eq!(service.completed_actions().len(), 1);
    }

    #[tokio::test]
    async fn test_confirm_without_preview_is_rejected() {
        let (mut service, chain) = unlocked_service(1_000_000);
        service.create_wallet("Main").unwrap();

        let err = service.confirm().await.unwrap_err();
        assert!(matches!(err, WalletError::NoPendingPreview));
        assert_eq!(chain.submissions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fund_and_retry() {
        // Quote totals 1.05 units against a balance of 1.00
        let (mut service, chain) = service_over(
            Arc::new(MemoryStorage::new()),
            StubDrafts::quoting(1_000_000_000, 30_000_000, 20_000_000),
            StubChain::with_balance(1_000_000_000),
            StubPrices::all_ok(),
        );
        service.set_password(TEST_PASSWORD, TEST_PASSWORD).unwrap();
        service.create_wallet("Main").unwrap();
        service.refresh_portfolio().await.unwrap();

        service.preview_launch(launch()).await.unwrap();
        let err = service.confirm().await.unwrap_err();
        match err {
            WalletError::InsufficientFunds {
                required,
                available,
            } => {
                assert_eq!(required, 1_050_000_000);
                assert_eq!(available, 1_000_000_000);
            }
            other => panic!("expected InsufficientFunds, got {other:?}"),
        }
        // Refusal was purely local
        assert_eq!(chain.submissions.load(Ordering::SeqCst), 0);

        // Top up, re-preview, confirm
        chain.set_balance(1_100_000_000);
        service.refresh_portfolio().await;
        service.preview_launch(launch()).await.unwrap();
        service.confirm().await.unwrap();
        assert_eq!(chain.submissions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_switching_wallet_drops_preview() {
        let (mut service, _) = unlocked_service(1_000_000);
        service.create_wallet("First").unwrap();
        let (second, _) = service.create_wallet("Second").unwrap();
        service.refresh_portfolio().await;

        service.preview_launch(launch()).await.unwrap();
        service.switch_wallet(&second.id).unwrap();

        let err = service.confirm().await.unwrap_err();
        assert!(matches!(err, WalletError::NoPendingPreview));
    }
}

// ============================================================================
// Portfolio Tests
// ============================================================================

mod portfolio_view {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_merges_native_and_tokens() {
        let asset = bs58::encode([4u8; 32]).into_string();
        let (mut service, _) = service_over(
            Arc::new(MemoryStorage::new()),
            StubDrafts::quoting(1, 1, 1),
            StubChain {
                balance: Mutex::new(2_000_000_000),
                assets: vec![asset.clone()],
                submissions: AtomicUsize::new(0),
            },
            StubPrices::all_ok(),
        );
        service.set_password(TEST_PASSWORD, TEST_PASSWORD).unwrap();
        service.create_wallet("Main").unwrap();

        let snapshot = service.refresh_portfolio().await.unwrap();
        assert_eq!(snapshot.native_balance, 2_000_000_000);
        // Native: 2.0 * $2 = $4; token: 0.005 * $2 = $0.01
        assert!((snapshot.total_value_usd - 4.01).abs() < 1e-9);
        assert!(snapshot.assets.contains_key(&asset));
    }

    #[tokio::test]
    async fn test_one_failing_price_does_not_sink_the_rest() {
        let good = bs58::encode([5u8; 32]).into_string();
        let bad = bs58::encode([6u8; 32]).into_string();
        let (mut service, _) = service_over(
            Arc::new(MemoryStorage::new()),
            StubDrafts::quoting(1, 1, 1),
            StubChain {
                balance: Mutex::new(1_000_000_000),
                assets: vec![good.clone(), bad.clone()],
                submissions: AtomicUsize::new(0),
            },
            StubPrices {
                failing: HashSet::from([bad.clone()]),
            },
        );
        service.set_password(TEST_PASSWORD, TEST_PASSWORD).unwrap();
        service.create_wallet("Main").unwrap();

        let snapshot = service.refresh_portfolio().await.unwrap();
        // The failed asset reports zero value; everything else is intact
        assert_eq!(snapshot.assets[&bad].value_usd, 0.0);
        assert!(snapshot.assets[&good].value_usd > 0.0);
        assert!(snapshot.total_value_usd > 2.0);
    }
}
