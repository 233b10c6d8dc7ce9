// ABOUTME: Shared application state wiring the sandbox services behind the HTTP API
// ABOUTME: Built from Settings in production, or from injected runners and clients in tests

use sorobox_config::Settings;
use sorobox_sandbox::{
    AccountManager, BalanceSource, BuildPipeline, CommandRunner, DeployPipeline, EventBus,
    FileGateway, HorizonBalances, LedgerClient, ProcessRunner, ProjectStore, SandboxError,
    SandboxManager, StellarLedger,
};
use std::sync::Arc;

use crate::signatures::SignatureBroker;
use crate::sse::SseConnectionTracker;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub events: EventBus,
    pub manager: Arc<SandboxManager>,
    pub files: Arc<FileGateway>,
    pub projects: Arc<ProjectStore>,
    pub build: Arc<BuildPipeline>,
    pub deploy: Arc<DeployPipeline>,
    pub accounts: Arc<AccountManager>,
    pub signatures: SignatureBroker,
    pub sse: SseConnectionTracker,
}

impl AppState {
    /// Production wiring: real processes, Soroban RPC and Horizon
    pub fn from_settings(settings: Settings, events: EventBus) -> Result<Self, SandboxError> {
        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new());
        let manager = Arc::new(SandboxManager::new(
            runner,
            settings.sandbox.clone(),
            settings.toolchain.stellar_bin.clone(),
            events,
        ));
        let ledger: Arc<dyn LedgerClient> =
            Arc::new(StellarLedger::new(manager.clone(), settings.network.clone())?);
        let balances: Arc<dyn BalanceSource> = Arc::new(HorizonBalances::new(&settings.network)?);
        Ok(Self::assemble(settings, manager, ledger, balances))
    }

    /// Wiring around an existing manager with injected network clients
    pub fn assemble(
        settings: Settings,
        manager: Arc<SandboxManager>,
        ledger: Arc<dyn LedgerClient>,
        balances: Arc<dyn BalanceSource>,
    ) -> Self {
        let events = manager.events().clone();
        let files = Arc::new(FileGateway::new(
            manager.clone(),
            settings.toolchain.max_file_bytes,
        ));
        let projects = Arc::new(ProjectStore::new(manager.clone()));
        let build = Arc::new(BuildPipeline::new(
            manager.clone(),
            files.clone(),
            settings.toolchain.clone(),
        ));
        let deploy = Arc::new(DeployPipeline::new(
            build.clone(),
            ledger,
            settings.network.clone(),
        ));
        let accounts = Arc::new(AccountManager::new(
            manager.clone(),
            settings.network.clone(),
            balances,
        ));
        let signatures = SignatureBroker::new(events.clone(), settings.network.signature_timeout);
        let sse = SseConnectionTracker::new(settings.events.max_connections_per_user);

        Self {
            settings: Arc::new(settings),
            events,
            manager,
            files,
            projects,
            build,
            deploy,
            accounts,
            signatures,
            sse,
        }
    }
}
