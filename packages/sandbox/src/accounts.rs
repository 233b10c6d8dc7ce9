// ABOUTME: Account and credential management for the sandbox's stellar CLI identities
// ABOUTME: Generates funded test-network keys, backs them up into the workspace and reports balances

use crate::error::{Result, SandboxError};
use crate::files::validate_project_name;
use crate::ledger::http_client;
use crate::manager::SandboxManager;
use crate::paths;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sorobox_config::NetworkSettings;
use std::sync::Arc;
use tracing::{info, warn};

/// Directory inside a project that receives the credential backup
pub const BACKUP_DIR: &str = ".stellar";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedAccount {
    pub account: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub output: String,
    /// Set when the credential backup could not be made
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatus {
    pub account: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<String>,
    pub message: String,
}

/// Looks up an account's native balance on the network
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn native_balance(&self, address: &str) -> std::result::Result<Option<String>, String>;
}

#[derive(Debug, Deserialize)]
struct HorizonAccount {
    balances: Vec<HorizonBalance>,
}

#[derive(Debug, Deserialize)]
struct HorizonBalance {
    balance: String,
    asset_type: String,
}

/// Balance lookups against a Horizon server
pub struct HorizonBalances {
    base_url: String,
    http: reqwest::Client,
}

impl HorizonBalances {
    /// Client for `network.horizon_url` using the network's HTTP timeouts
    pub fn new(network: &NetworkSettings) -> Result<Self> {
        Ok(Self {
            base_url: network.horizon_url.clone(),
            http: http_client(network)?,
        })
    }
}

#[async_trait]
impl BalanceSource for HorizonBalances {
    async fn native_balance(&self, address: &str) -> std::result::Result<Option<String>, String> {
        let url = format!("{}/accounts/{}", self.base_url.trim_end_matches('/'), address);
        let response = self.http.get(&url).send().await.map_err(|e| e.to_string())?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(format!("Horizon returned {}", response.status()));
        }
        let account: HorizonAccount = response.json().await.map_err(|e| e.to_string())?;
        Ok(account
            .balances
            .into_iter()
            .find(|b| b.asset_type == "native")
            .map(|b| b.balance))
    }
}

pub struct AccountManager {
    manager: Arc<SandboxManager>,
    network: NetworkSettings,
    balances: Arc<dyn BalanceSource>,
}

impl AccountManager {
    pub fn new(
        manager: Arc<SandboxManager>,
        network: NetworkSettings,
        balances: Arc<dyn BalanceSource>,
    ) -> Self {
        Self {
            manager,
            network,
            balances,
        }
    }

    fn account_name<'a>(&'a self, account: Option<&'a str>) -> Result<&'a str> {
        let name = account
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(self.network.source_account.as_str());
        if !paths::is_safe_name(name) {
            return Err(SandboxError::InvalidAccountName(name.to_string()));
        }
        Ok(name)
    }

    async fn address(&self, container: &str, account: &str) -> Option<String> {
        let output = self
            .manager
            .exec(self.manager.exec_request(
                container,
                [self.manager.stellar_bin(), "keys", "address", account],
            ))
            .await;
        let address = output.stdout_trimmed();
        (output.success() && !address.is_empty()).then_some(address)
    }

    /// Generate and fund a key, then copy the credential directory into a project
    pub async fn create_account(
        &self,
        user_id: &str,
        account: Option<&str>,
        project: Option<&str>,
    ) -> Result<CreatedAccount> {
        let account = self.account_name(account)?;
        let container = self.manager.ensure_running(user_id).await?;
        let settings = self.manager.settings();

        self.manager.events().info(
            user_id,
            format!("Generating key {} on {}", account, self.network.network),
        );
        let output = self
            .manager
            .exec(
                self.manager
                    .exec_request(
                        &container,
                        [
                            self.manager.stellar_bin(),
                            "keys",
                            "generate",
                            account,
                            "--network",
                            self.network.network.as_str(),
                            "--fund",
                        ],
                    )
                    .timeout(settings.init_timeout),
            )
            .await;
        if !output.success() {
            self.manager
                .events()
                .error(user_id, format!("Key generation failed: {}", output.failure_summary()));
            return Err(SandboxError::CredentialGenerationFailed {
                diagnostics: (&output).into(),
            });
        }

        let address = self.address(&container, account).await;
        let project = match project.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) => validate_project_name(p)?,
            None => settings.default_project.as_str(),
        };
        let warning = self.backup_credentials(&container, project).await.err();
        if let Some(warning) = &warning {
            self.manager.events().warn(user_id, warning.clone());
        }

        info!(user_id, account, "Account created");
        Ok(CreatedAccount {
            account: account.to_string(),
            address,
            output: output.combined(),
            warning,
        })
    }

    /// Best-effort copy of the credential home into `<project>/.stellar`
    async fn backup_credentials(&self, container: &str, project: &str) -> std::result::Result<(), String> {
        let settings = self.manager.settings();
        let target = format!("{}/{}/{}", self.manager.workspace_root(), project, BACKUP_DIR);
        if paths::is_within(&settings.credential_home, &target) {
            return Err("credential backup target lies inside the credential home".to_string());
        }
        let output = self
            .manager
            .exec(self.manager.exec_request(
                container,
                ["cp", "-r", "-T", settings.credential_home.as_str(), target.as_str()],
            ))
            .await;
        if output.success() {
            Ok(())
        } else {
            Err(format!(
                "Account created but credential backup failed: {}",
                output.failure_summary()
            ))
        }
    }

    /// Whether the identity exists and, if reachable, its balance
    pub async fn account_status(&self, user_id: &str, account: Option<&str>) -> Result<AccountStatus> {
        let account = self.account_name(account)?;
        let container = self.manager.ensure_running(user_id).await?;
        let identity = format!(
            "{}/identities/{}.toml",
            self.manager.settings().credential_home.trim_end_matches('/'),
            account
        );
        let exists = self
            .manager
            .exec(self.manager.exec_request(&container, ["test", "-f", identity.as_str()]))
            .await
            .success();
        if !exists {
            return Ok(AccountStatus {
                account: account.to_string(),
                exists: false,
                address: None,
                balance: None,
                message: "Account does not exist".to_string(),
            });
        }

        let Some(address) = self.address(&container, account).await else {
            return Ok(degraded(account, None, "address could not be resolved"));
        };

        match self.balances.native_balance(&address).await {
            Ok(Some(balance)) => Ok(AccountStatus {
                account: account.to_string(),
                exists: true,
                address: Some(address),
                message: format!("Balance: {} XLM", balance),
                balance: Some(balance),
            }),
            Ok(None) => Ok(degraded(account, Some(address), "account not found on network")),
            Err(e) => {
                warn!(user_id, account, "Balance lookup failed: {}", e);
                Ok(degraded(account, Some(address), &e))
            }
        }
    }
}

fn degraded(account: &str, address: Option<String>, reason: &str) -> AccountStatus {
    AccountStatus {
        account: account.to_string(),
        exists: true,
        address,
        balance: None,
        message: format!("Account exists but balance unavailable ({})", reason),
    }
}
