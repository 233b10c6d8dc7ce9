// ABOUTME: Per-user Soroban sandbox orchestration over the docker and stellar CLIs
// ABOUTME: Container lifecycle, file gateway, project store, build/deploy pipeline and accounts

pub mod accounts;
pub mod build;
pub mod deploy;
pub mod docker;
pub mod error;
pub mod events;
pub mod exec;
pub mod files;
pub mod ledger;
pub mod manager;
pub mod paths;
pub mod poll;
pub mod projects;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use accounts::{AccountManager, AccountStatus, BalanceSource, CreatedAccount, HorizonBalances};
pub use build::{BuildArtifact, BuildPipeline, BuildStatus, PipelineRun};
pub use deploy::{
    ArtifactSource, DeployPipeline, Deployment, DeploymentStatus, PhaseReport, PhaseStatus,
    WalletDeployment,
};
pub use docker::{DockerCli, ExecRequest, RunOptions};
pub use error::{Diagnostics, Result, SandboxError};
pub use events::{EventBus, EventKind, LogLevel, PipelineStage, SandboxEvent};
pub use exec::{CommandOutput, CommandRunner, CommandSpec, ExitStatus, ProcessRunner};
pub use files::{EntryKind, FileEntry, FileGateway, WriteReport};
pub use ledger::{
    DeployPhase, LedgerClient, LedgerContext, SignatureRequest, SignedTransaction, StellarLedger,
    Submission, TransactionSigner, TxStatus, UnsignedTransaction,
};
pub use manager::{CreatedSandbox, SandboxManager, SandboxStatus};
pub use poll::{PollOutcome, PollPolicy};
pub use projects::{Project, ProjectStore};
