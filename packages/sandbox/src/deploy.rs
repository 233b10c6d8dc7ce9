// ABOUTME: Contract deployment: CLI deploy with a sandbox key, or two wallet-signed transactions
// ABOUTME: Wallet deployments report upload and create phases separately so partial progress stays visible

use crate::build::{BuildArtifact, BuildPipeline, PipelineRun};
use crate::error::{Diagnostics, Result, SandboxError};
use crate::events::{EventKind, PipelineStage};
use crate::files::validate_project_name;
use crate::ledger::{
    decode_bytes_return_value, is_account_address, to_hex, wasm_hash, DeployPhase, LedgerClient, LedgerContext,
    SignatureRequest, TransactionSigner, TxStatus,
};
use crate::poll::{poll_until, PollOutcome, PollPolicy, Probe};
use rand::RngCore;
use serde::Serialize;
use sorobox_config::NetworkSettings;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub contract_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    pub alias: String,
    pub output: String,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactSource {
    /// Build the project again before deploying
    Rebuild,
    /// Use the artifact left by an earlier successful build
    Existing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PhaseStatus {
    Succeeded,
    Failed,
    TimedOut,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseReport {
    pub phase: DeployPhase,
    pub status: PhaseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Tool output behind a failed phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Diagnostics>,
}

impl PhaseReport {
    fn skipped(phase: DeployPhase) -> Self {
        Self {
            phase,
            status: PhaseStatus::Skipped,
            transaction_hash: None,
            detail: Some("previous phase did not succeed".to_string()),
            diagnostics: None,
        }
    }

    fn failed(phase: DeployPhase, hash: Option<String>, detail: impl Into<String>) -> Self {
        Self {
            phase,
            status: PhaseStatus::Failed,
            transaction_hash: hash,
            detail: Some(detail.into()),
            diagnostics: None,
        }
    }

    fn from_error(phase: DeployPhase, error: SandboxError) -> Self {
        Self {
            diagnostics: error.diagnostics().filter(|d| !d.is_empty()).cloned(),
            ..Self::failed(phase, None, error.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletDeployment {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wasm_hash: Option<String>,
    /// Hash of the create transaction when it succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    pub phases: Vec<PhaseReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatus {
    pub is_deployed: bool,
    pub alias: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<String>,
}

pub struct DeployPipeline {
    build: Arc<BuildPipeline>,
    ledger: Arc<dyn LedgerClient>,
    network: NetworkSettings,
    poll_policy: PollPolicy,
}

impl DeployPipeline {
    pub fn new(
        build: Arc<BuildPipeline>,
        ledger: Arc<dyn LedgerClient>,
        network: NetworkSettings,
    ) -> Self {
        let poll_policy = PollPolicy::for_transactions(&network);
        Self {
            build,
            ledger,
            network,
            poll_policy,
        }
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poll_policy = policy;
        self
    }

    /// Rebuild the project, then deploy it with the sandbox's CLI identity
    pub async fn deploy(
        &self,
        user_id: &str,
        project: &str,
        source_account: Option<&str>,
    ) -> Result<Deployment> {
        let manager = self.build.manager();
        let events = manager.events();
        let source = source_account
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(self.network.source_account.as_str());
        if !crate::paths::is_safe_name(source) {
            return Err(SandboxError::InvalidAccountName(source.to_string()));
        }

        let mut run = PipelineRun::new(user_id, project, events.clone());
        let scope = self.build.files().scope(user_id, project).await?;
        let artifact = self.build.build_in(&mut run, &scope).await?;

        run.advance(PipelineStage::Deploying);
        let alias = contract_alias(project);
        events.info(
            user_id,
            format!("Deploying {} to {} as {}", alias, self.network.network, source),
        );

        let toolchain = self.build.toolchain();
        let output = manager
            .exec(
                manager
                    .exec_request(
                        &scope.container,
                        [
                            toolchain.stellar_bin.as_str(),
                            "contract",
                            "deploy",
                            "--wasm",
                            artifact.path.as_str(),
                            "--source-account",
                            source,
                            "--network",
                            self.network.network.as_str(),
                            "--alias",
                            alias.as_str(),
                        ],
                    )
                    .workdir(scope.root.as_str())
                    .timeout(toolchain.deploy_timeout)
                    .max_output_bytes(toolchain.max_output_bytes),
            )
            .await;

        if !output.success() {
            run.advance(PipelineStage::DeployFailed);
            events.error(user_id, format!("Deployment failed: {}", output.failure_summary()));
            return Err(SandboxError::DeployFailed {
                message: output.failure_summary(),
                diagnostics: (&output).into(),
            });
        }

        let stdout = output.stdout_lossy();
        let stderr = output.stderr_lossy();
        let Some(contract_id) = find_contract_id(&stdout).or_else(|| find_contract_id(&stderr))
        else {
            run.advance(PipelineStage::DeployFailed);
            return Err(SandboxError::DeployFailed {
                message: "deploy finished without reporting a contract id".to_string(),
                diagnostics: (&output).into(),
            });
        };

        run.advance(PipelineStage::Deployed);
        info!(user_id, project, contract_id = %contract_id, "Contract deployed");
        events.info(user_id, format!("Contract deployed: {}", contract_id));
        Ok(Deployment {
            transaction_hash: find_transaction_hash(&output.combined()),
            contract_id,
            alias,
            output: output.combined(),
            stdout,
            stderr,
        })
    }

    /// Deploy with two externally signed transactions: upload the wasm, then create the instance
    pub async fn deploy_with_wallet(
        &self,
        user_id: &str,
        project: &str,
        wallet_address: &str,
        source: ArtifactSource,
        signer: &dyn TransactionSigner,
    ) -> Result<WalletDeployment> {
        if !is_account_address(wallet_address) {
            return Err(SandboxError::InvalidAccountName(wallet_address.to_string()));
        }
        let manager = self.build.manager();
        let events = manager.events();
        let mut run = PipelineRun::new(user_id, project, events.clone());
        let scope = self.build.files().scope(user_id, project).await?;

        let artifact: BuildArtifact = match source {
            ArtifactSource::Rebuild => self.build.build_in(&mut run, &scope).await?,
            ArtifactSource::Existing => {
                let Some(artifact) = self.build.existing_artifact(&scope).await? else {
                    return Err(SandboxError::ArtifactMissingAfterBuild {
                        path: format!("{}/target", scope.root),
                        diagnostics: Default::default(),
                    });
                };
                // An existing artifact counts as a completed build
                run.advance(PipelineStage::Building);
                run.advance(PipelineStage::Built);
                artifact
            }
        };

        run.advance(PipelineStage::Deploying);
        let ctx = LedgerContext {
            user_id: user_id.to_string(),
            container: scope.container.clone(),
            workdir: scope.root.clone(),
            source_address: wallet_address.to_string(),
        };

        // Phase 1: upload
        let upload = self
            .run_phase(&ctx, DeployPhase::Upload, signer, || {
                self.ledger.build_upload(&ctx, &artifact.path)
            })
            .await;
        let (upload_report, upload_return) = match upload {
            Ok((report, return_value)) => (report, return_value),
            Err(report) => {
                run.advance(PipelineStage::DeployFailed);
                return Ok(WalletDeployment {
                    success: false,
                    contract_id: None,
                    wasm_hash: None,
                    transaction_hash: None,
                    phases: vec![report, PhaseReport::skipped(DeployPhase::Create)],
                });
            }
        };

        let hash = upload_return
            .as_deref()
            .and_then(decode_bytes_return_value)
            .unwrap_or_else(|| wasm_hash(&artifact.bytes));
        events.info(user_id, format!("Wasm uploaded with hash {}", hash));

        // Phase 2: create with a fresh salt
        let mut salt = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut salt);
        let salt_hex = to_hex(&salt);

        let create = self
            .run_phase(&ctx, DeployPhase::Create, signer, || {
                self.ledger.build_create(&ctx, &hash, &salt_hex)
            })
            .await;
        let create_report = match create {
            Ok((report, _)) => report,
            Err(report) => {
                run.advance(PipelineStage::DeployFailed);
                events.error(user_id, "Wasm uploaded but contract creation failed");
                return Ok(WalletDeployment {
                    success: false,
                    contract_id: None,
                    wasm_hash: Some(hash),
                    transaction_hash: None,
                    phases: vec![upload_report, report],
                });
            }
        };

        let contract_id = match self.ledger.contract_id(&ctx, &salt_hex).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(user_id, "Could not compute contract id: {}", e);
                None
            }
        };

        run.advance(PipelineStage::Deployed);
        if let Some(id) = &contract_id {
            events.info(user_id, format!("Contract deployed: {}", id));
        }
        Ok(WalletDeployment {
            success: true,
            contract_id,
            wasm_hash: Some(hash),
            transaction_hash: create_report.transaction_hash.clone(),
            phases: vec![upload_report, create_report],
        })
    }

    /// Build, sign, submit and confirm one transaction.
    /// Returns the transaction's return value on success, or a failed report.
    async fn run_phase<F, Fut>(
        &self,
        ctx: &LedgerContext,
        phase: DeployPhase,
        signer: &dyn TransactionSigner,
        build: F,
    ) -> std::result::Result<(PhaseReport, Option<String>), PhaseReport>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<crate::ledger::UnsignedTransaction>>,
    {
        let events = self.build.manager().events();
        let user_id = ctx.user_id.as_str();

        let unsigned = build()
            .await
            .map_err(|e| PhaseReport::from_error(phase, e))?;

        let signed = signer
            .sign(SignatureRequest {
                request_id: uuid::Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                phase,
                transaction_xdr: unsigned.xdr,
                network_passphrase: self.ledger.network_passphrase().to_string(),
            })
            .await
            .map_err(|e| PhaseReport::from_error(phase, e))?;

        let submission = self
            .ledger
            .submit(&signed)
            .await
            .map_err(|e| PhaseReport::from_error(phase, e))?;
        let hash = submission.hash;
        events.info(user_id, format!("{} transaction submitted: {}", phase, hash));

        let policy = self.poll_policy;
        let outcome = poll_until(
            policy,
            |_| {
                let hash = hash.as_str();
                async move {
                    match self.ledger.transaction_status(hash).await {
                        Ok(TxStatus::Success { return_value }) => Probe::Ready(Ok(return_value)),
                        Ok(TxStatus::Failed { detail }) => Probe::Ready(Err(detail)),
                        Ok(TxStatus::Pending) | Ok(TxStatus::NotFound) => Probe::Pending,
                        Err(e) => {
                            warn!(hash, "Transaction status check failed: {}", e);
                            Probe::Pending
                        }
                    }
                }
            },
            |attempt| {
                events.publish(
                    user_id,
                    EventKind::PollProgress {
                        phase: phase.to_string(),
                        attempt,
                        max_attempts: policy.max_attempts,
                    },
                )
            },
        )
        .await;

        match outcome {
            PollOutcome::Ready {
                value: Ok(return_value),
                attempts,
            } => {
                info!(user_id, %phase, hash = %hash, attempts, "Transaction confirmed");
                Ok((
                    PhaseReport {
                        phase,
                        status: PhaseStatus::Succeeded,
                        transaction_hash: Some(hash),
                        detail: None,
                        diagnostics: None,
                    },
                    return_value,
                ))
            }
            PollOutcome::Ready {
                value: Err(detail), ..
            } => Err(PhaseReport::failed(phase, Some(hash), detail)),
            PollOutcome::Exhausted { attempts } => Err(PhaseReport {
                phase,
                status: PhaseStatus::TimedOut,
                transaction_hash: Some(hash),
                detail: Some(format!("not confirmed after {} attempts", attempts)),
                diagnostics: None,
            }),
        }
    }

    /// Whether the project's alias resolves to a deployed contract
    pub async fn deployment_status(&self, user_id: &str, project: &str) -> Result<DeploymentStatus> {
        let project = validate_project_name(project)?;
        let manager = self.build.manager();
        let container = manager.ensure_running(user_id).await?;
        let alias = contract_alias(project);
        let output = manager
            .exec(manager.exec_request(
                &container,
                [
                    manager.stellar_bin(),
                    "contract",
                    "alias",
                    "show",
                    alias.as_str(),
                    "--network",
                    self.network.network.as_str(),
                ],
            ))
            .await;
        let contract_id = if output.success() {
            find_contract_id(&output.stdout_lossy())
        } else {
            None
        };
        Ok(DeploymentStatus {
            is_deployed: contract_id.is_some(),
            alias,
            contract_id,
        })
    }
}

/// Alias under which a project's contract is registered
pub fn contract_alias(project: &str) -> String {
    project.replace('-', "_")
}

/// First Stellar contract strkey (56 chars, `C` prefix, base32) in `text`
pub fn find_contract_id(text: &str) -> Option<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .find(|token| {
            token.len() == 56
                && token.starts_with('C')
                && token
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || ('2'..='7').contains(&c))
        })
        .map(str::to_string)
}

/// First 64-char hex token in `text`
pub fn find_transaction_hash(text: &str) -> Option<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .find(|token| token.len() == 64 && token.chars().all(|c| c.is_ascii_hexdigit()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTRACT: &str = "CDLZFC3SYJYDZT7K67VZ75HPJVIEUVNIXF47ZG2FB2RMQQVU2HHGCYSC";

    #[test]
    fn test_find_contract_id() {
        let output = format!("ℹ️ Deploying...\n✅ Deployed!\n{}\n", CONTRACT);
        assert_eq!(find_contract_id(&output).as_deref(), Some(CONTRACT));
        assert_eq!(find_contract_id("no id here"), None);
        // Account keys start with G
        assert_eq!(
            find_contract_id("GDLZFC3SYJYDZT7K67VZ75HPJVIEUVNIXF47ZG2FB2RMQQVU2HHGCYSC"),
            None
        );
    }

    #[test]
    fn test_find_transaction_hash() {
        let hash = "a".repeat(64);
        let text = format!("Transaction hash is {}\n", hash);
        assert_eq!(find_transaction_hash(&text), Some(hash));
        assert_eq!(find_transaction_hash("abc"), None);
    }

    #[test]
    fn test_contract_alias() {
        assert_eq!(contract_alias("soroban-hello-world"), "soroban_hello_world");
    }
}
