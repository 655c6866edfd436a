//! Wallet Service Facade
//!
//! The one type a host embeds. It wires the registry, auth gate,
//! orchestrator and portfolio aggregator together and enforces the session
//! gate in front of every operation that touches key material or spends
//! funds. Read-only views (wallet list, portfolio snapshot) stay open so a
//! relocked UI can still render.

use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::info;
use zeroize::Zeroizing;

use crate::auth::{AuthGate, BiometricAuthenticator, GateState};
use crate::config::WalletConfig;
use crate::error::Result;
use crate::orchestrator::{
    CompletedAction, LaunchParams, Orchestrator, PendingPreview, PreviewSubject, SwapParams,
};
use crate::portfolio::{PortfolioAggregator, PortfolioSnapshot};
use crate::registry::{WalletRecord, WalletRegistry};
use crate::rpc::{
    ChainClient, DraftService, HttpChainClient, HttpDraftService, HttpPriceService, PriceService,
};
use crate::storage::SecureStorage;

/// Embeddable wallet core: registry, auth, transactions and portfolio
/// behind one session-gated surface.
pub struct WalletService {
    auth: AuthGate,
    registry: WalletRegistry,
    orchestrator: Orchestrator,
    portfolio: Arc<PortfolioAggregator>,
    config: WalletConfig,
}

impl WalletService {
    /// Open against the given storage, talking to the configured HTTP
    /// endpoints.
    pub fn open(config: WalletConfig, storage: Arc<dyn SecureStorage>) -> Result<Self> {
        let drafts: Arc<dyn DraftService> = Arc::new(HttpDraftService::new(&config)?);
        let chain: Arc<dyn ChainClient> = Arc::new(HttpChainClient::new(&config)?);
        let prices: Arc<dyn PriceService> = Arc::new(HttpPriceService::new(&config)?);
        Self::with_services(config, storage, drafts, chain, prices)
    }

    /// Open with injected network services. Hosts and tests use this to
    /// substitute their own transports.
    pub fn with_services(
        config: WalletConfig,
        storage: Arc<dyn SecureStorage>,
        drafts: Arc<dyn DraftService>,
        chain: Arc<dyn ChainClient>,
        prices: Arc<dyn PriceService>,
    ) -> Result<Self> {
        let auth = AuthGate::load(Arc::clone(&storage))?;
        let registry = WalletRegistry::load(storage)?;
        let portfolio = Arc::new(PortfolioAggregator::new(Arc::clone(&chain), prices));
        let mut orchestrator = Orchestrator::new(drafts, chain, config.clone());

        if let Some(active) = registry.active() {
            orchestrator.bind_wallet(active);
            portfolio.bind(&active.public_address);
            info!(address = %active.public_address, "restored active wallet");
        }

        Ok(Self {
            auth,
            registry,
            orchestrator,
            portfolio,
            config,
        })
    }

    // --- session gate ---

    /// First-run password setup. Unlocks the session on success.
    pub fn set_password(&mut self, password: &str, confirm: &str) -> Result<()> {
        self.auth.set_password(password, confirm, Instant::now())
    }

    pub fn change_password(
        &mut self,
        old_password: &str,
        new_password: &str,
        confirm: &str,
    ) -> Result<()> {
        self.auth
            .change_password(old_password, new_password, confirm, Instant::now())
    }

    pub fn unlock(&mut self, password: &str) -> Result<()> {
        self.auth.unlock(password, Instant::now())
    }

    pub fn unlock_biometric(&mut self, authenticator: &dyn BiometricAuthenticator) -> Result<()> {
        self.auth.unlock_biometric(authenticator, Instant::now())
    }

    /// Enroll a biometric credential; the session must already be unlocked.
    pub fn register_biometric(
        &mut self,
        authenticator: &dyn BiometricAuthenticator,
    ) -> Result<()> {
        self.auth.register_biometric(authenticator, Instant::now())
    }

    pub fn clear_biometric(&mut self) -> Result<()> {
        self.auth.clear_biometric()
    }

    pub fn lock(&mut self) {
        self.auth.lock();
    }

    pub fn auth_state(&self) -> GateState {
        self.auth.state_at(Instant::now())
    }

    pub fn is_unlocked(&self) -> bool {
        self.auth.is_unlocked(Instant::now())
    }

    // --- wallet management (gated) ---

    /// Create a fresh wallet. Returns the record and the recovery phrase;
    /// the phrase exists only in this return value, show it once.
    pub fn create_wallet(&mut self, name: &str) -> Result<(WalletRecord, Zeroizing<String>)> {
        self.auth.require_unlocked(Instant::now())?;
        let created = self.registry.create(name)?;
        self.sync_active_binding();
        Ok(created)
    }

    /// Import a wallet from secret material (byte-array JSON, hex, base-58
    /// or a recovery phrase).
    pub fn import_wallet(&mut self, name: &str, secret_material: &str) -> Result<WalletRecord> {
        self.auth.require_unlocked(Instant::now())?;
        let record = self.registry.import(name, secret_material)?;
        self.sync_active_binding();
        Ok(record)
    }

    /// Make another wallet active. The orchestrator and portfolio rebind,
    /// which discards any pending preview and clears the stale snapshot.
    pub fn switch_wallet(&mut self, id: &str) -> Result<WalletRecord> {
        self.auth.require_unlocked(Instant::now())?;
        let record = self.registry.switch_active(id)?;
        self.sync_active_binding();
        Ok(record)
    }

    pub fn rename_wallet(&mut self, id: &str, new_name: &str) -> Result<()> {
        self.auth.require_unlocked(Instant::now())?;
        self.registry.rename(id, new_name)
    }

    pub fn set_wallet_avatar(&mut self, id: &str, avatar: Option<String>) -> Result<()> {
        self.auth.require_unlocked(Instant::now())?;
        self.registry.set_avatar(id, avatar)
    }

    pub fn remove_wallet(&mut self, id: &str) -> Result<()> {
        self.auth.require_unlocked(Instant::now())?;
        self.registry.remove(id)
    }

    pub fn wallets(&self) -> &[WalletRecord] {
        self.registry.wallets()
    }

    pub fn active_wallet(&self) -> Option<&WalletRecord> {
        self.registry.active()
    }

    // --- transactions (gated) ---

    /// Preview a token launch with a seeded pool.
    pub async fn preview_launch(&mut self, params: LaunchParams) -> Result<&PendingPreview> {
        self.auth.require_unlocked(Instant::now())?;
        let balance = self.portfolio.known_native_balance();
        self.orchestrator
            .preview(PreviewSubject::PoolCreation(params), balance)
            .await
    }

    /// Preview a swap against an existing pool.
    pub async fn preview_swap(&mut self, params: SwapParams) -> Result<&PendingPreview> {
        self.auth.require_unlocked(Instant::now())?;
        let balance = self.portfolio.known_native_balance();
        self.orchestrator
            .preview(PreviewSubject::DirectMint(params), balance)
            .await
    }

    /// Sign, submit and finalize the pending preview. On success the
    /// portfolio refreshes in the background so balances catch up.
    pub async fn confirm(&mut self) -> Result<CompletedAction> {
        self.auth.require_unlocked(Instant::now())?;
        let balance = self.portfolio.known_native_balance();
        let action = self.orchestrator.confirm(balance).await?;

        let portfolio = Arc::clone(&self.portfolio);
        tokio::spawn(async move {
            portfolio.refresh().await;
        });

        Ok(action)
    }

    pub fn discard_preview(&mut self) {
        self.orchestrator.discard();
    }

    pub fn pending_preview(&self) -> Option<&PendingPreview> {
        self.orchestrator.pending()
    }

    pub fn completed_actions(&self) -> &[CompletedAction] {
        self.orchestrator.completed_actions()
    }

    // --- portfolio ---

    /// Latest snapshot, if any refresh has completed since binding.
    pub fn portfolio(&self) -> Option<PortfolioSnapshot> {
        self.portfolio.snapshot()
    }

    /// Refresh now and return the fresh snapshot. `None` when no wallet is
    /// active or a newer refresh already landed.
    pub async fn refresh_portfolio(&self) -> Option<PortfolioSnapshot> {
        self.portfolio.refresh().await
    }

    /// Host signal that the app regained the foreground. Balances may have
    /// moved while suspended, so refresh immediately rather than waiting
    /// for the next scheduled tick.
    pub async fn on_foreground(&self) -> Option<PortfolioSnapshot> {
        self.portfolio.refresh().await
    }

    /// Spawn the scheduled refresh loop at the configured interval.
    pub fn start_refresh_loop(&self) -> JoinHandle<()> {
        let portfolio = Arc::clone(&self.portfolio);
        let interval = self.config.refresh_interval();
        tokio::spawn(portfolio.run_scheduled(interval))
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    /// Rebind the orchestrator and aggregator to whatever wallet is active
    /// now. Called after any registry mutation that can move the marker.
    fn sync_active_binding(&mut self) {
        if let Some(active) = self.registry.active() {
            if self
                .portfolio
                .bound_address()
                .as_deref()
                != Some(active.public_address.as_str())
            {
                self.orchestrator.bind_wallet(active);
                self.portfolio.bind(&active.public_address);

                // A fresh binding starts from an empty snapshot; refresh
                // right away rather than waiting for the next scheduled
                // tick. Hosts may construct the service outside a runtime,
                // so only spawn when one is present.
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let portfolio = Arc::clone(&self.portfolio);
                    handle.spawn(async move {
                        portfolio.refresh().await;
                    });
                }
            }
        }
    }
}
