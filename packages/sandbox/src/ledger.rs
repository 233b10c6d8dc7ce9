// ABOUTME: Ledger access for wallet-signed deployments: unsigned transaction building, submission and status
// ABOUTME: Transactions are built and simulated with the stellar CLI inside the sandbox, then submitted over Soroban RPC

use crate::error::{Diagnostics, Result, SandboxError};
use crate::manager::SandboxManager;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use sorobox_config::NetworkSettings;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// XDR discriminant of `ScVal::Bytes`
const SCV_BYTES: u32 = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeployPhase {
    Upload,
    Create,
}

impl fmt::Display for DeployPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployPhase::Upload => write!(f, "upload"),
            DeployPhase::Create => write!(f, "create"),
        }
    }
}

/// Where CLI-side transaction building runs
#[derive(Debug, Clone)]
pub struct LedgerContext {
    pub user_id: String,
    pub container: String,
    pub workdir: String,
    /// Public key of the wallet that pays for and signs the transactions
    pub source_address: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnsignedTransaction {
    pub xdr: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureRequest {
    pub request_id: String,
    pub user_id: String,
    pub phase: DeployPhase,
    pub transaction_xdr: String,
    pub network_passphrase: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignedTransaction {
    pub xdr: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TxStatus {
    Pending,
    NotFound,
    Success { return_value: Option<String> },
    Failed { detail: String },
}

/// Obtains signatures for unsigned transactions from an external wallet
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    async fn sign(&self, request: SignatureRequest) -> Result<SignedTransaction>;
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn build_upload(&self, ctx: &LedgerContext, wasm_path: &str) -> Result<UnsignedTransaction>;

    async fn build_create(
        &self,
        ctx: &LedgerContext,
        wasm_hash: &str,
        salt_hex: &str,
    ) -> Result<UnsignedTransaction>;

    async fn submit(&self, signed: &SignedTransaction) -> Result<Submission>;

    async fn transaction_status(&self, hash: &str) -> Result<TxStatus>;

    async fn contract_id(&self, ctx: &LedgerContext, salt_hex: &str) -> Result<String>;

    fn network_passphrase(&self) -> &str;
}

/// Hex SHA-256 of a wasm blob, which is its on-ledger hash
pub fn wasm_hash(bytes: &[u8]) -> String {
    to_hex(&Sha256::digest(bytes))
}

/// Stellar account strkey: 56 base32 characters starting with `G`
pub fn is_account_address(address: &str) -> bool {
    address.len() == 56
        && address.starts_with('G')
        && address
            .chars()
            .all(|c| c.is_ascii_uppercase() || ('2'..='7').contains(&c))
}

pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Decode a base64 `ScVal::Bytes` return value into hex
pub fn decode_bytes_return_value(xdr_base64: &str) -> Option<String> {
    let raw = STANDARD.decode(xdr_base64.trim()).ok()?;
    if raw.len() < 8 {
        return None;
    }
    let discriminant = u32::from_be_bytes(raw[0..4].try_into().ok()?);
    let len = u32::from_be_bytes(raw[4..8].try_into().ok()?) as usize;
    if discriminant != SCV_BYTES || raw.len() < 8 + len {
        return None;
    }
    Some(to_hex(&raw[8..8 + len]))
}

/// `LedgerClient` backed by the sandbox's stellar CLI and a Soroban RPC endpoint
pub struct StellarLedger {
    manager: Arc<SandboxManager>,
    network: NetworkSettings,
    http: reqwest::Client,
}

impl StellarLedger {
    pub fn new(manager: Arc<SandboxManager>, network: NetworkSettings) -> Result<Self> {
        let http = http_client(&network)?;
        Ok(Self {
            manager,
            network,
            http,
        })
    }

    async fn cli(&self, ctx: &LedgerContext, args: &[&str], what: &str) -> Result<String> {
        self.cli_with_input(ctx, args, None, what).await
    }

    async fn cli_with_input(
        &self,
        ctx: &LedgerContext,
        args: &[&str],
        input: Option<&str>,
        what: &str,
    ) -> Result<String> {
        let argv = std::iter::once(self.manager.stellar_bin()).chain(args.iter().copied());
        let mut request = self
            .manager
            .exec_request(&ctx.container, argv)
            .workdir(ctx.workdir.as_str());
        if let Some(input) = input {
            request = request.stdin(input.as_bytes().to_vec());
        }
        let output = self.manager.exec(request).await;
        if !output.success() {
            return Err(SandboxError::DeployFailed {
                message: format!("{}: {}", what, output.failure_summary()),
                diagnostics: (&output).into(),
            });
        }
        let stdout = output.stdout_trimmed();
        // The CLI prints the artifact on the last line
        let last = stdout.lines().last().unwrap_or_default().trim().to_string();
        if last.is_empty() {
            return Err(SandboxError::DeployFailed {
                message: format!("{}: no output", what),
                diagnostics: (&output).into(),
            });
        }
        Ok(last)
    }

    /// Simulate a built transaction against the network and return it with the
    /// footprint, resource fee and authorization entries applied
    async fn prepare(&self, ctx: &LedgerContext, built: &str) -> Result<UnsignedTransaction> {
        debug!(user_id = %ctx.user_id, "Simulating transaction before signing");
        let xdr = self
            .cli_with_input(
                ctx,
                &[
                    "tx",
                    "simulate",
                    "--source-account",
                    ctx.source_address.as_str(),
                    "--network",
                    self.network.network.as_str(),
                ],
                Some(built),
                "simulating transaction",
            )
            .await?;
        Ok(UnsignedTransaction { xdr })
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        debug!(method, url = %self.network.rpc_url, "Calling Soroban RPC");
        let response = self
            .http
            .post(&self.network.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| rpc_error(method, e.to_string()))?;
        let payload: Value = response
            .json()
            .await
            .map_err(|e| rpc_error(method, e.to_string()))?;
        if let Some(error) = payload.get("error") {
            return Err(rpc_error(method, error.to_string()));
        }
        payload
            .get("result")
            .cloned()
            .ok_or_else(|| rpc_error(method, "response has no result".to_string()))
    }
}

/// HTTP client for network calls, bounded by the configured timeouts
pub(crate) fn http_client(network: &NetworkSettings) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(network.http_timeout)
        .connect_timeout(network.http_connect_timeout)
        .build()
        .map_err(|e| SandboxError::Internal(format!("failed to build HTTP client: {}", e)))
}

fn rpc_error(method: &str, detail: String) -> SandboxError {
    SandboxError::DeployFailed {
        message: format!("RPC {} failed", method),
        diagnostics: Diagnostics::new(String::new(), detail),
    }
}

#[async_trait]
impl LedgerClient for StellarLedger {
    async fn build_upload(&self, ctx: &LedgerContext, wasm_path: &str) -> Result<UnsignedTransaction> {
        let xdr = self
            .cli(
                ctx,
                &[
                    "contract",
                    "upload",
                    "--wasm",
                    wasm_path,
                    "--source-account",
                    ctx.source_address.as_str(),
                    "--network",
                    self.network.network.as_str(),
                    "--build-only",
                ],
                "building upload transaction",
            )
            .await?;
        self.prepare(ctx, &xdr).await
    }

    async fn build_create(
        &self,
        ctx: &LedgerContext,
        wasm_hash: &str,
        salt_hex: &str,
    ) -> Result<UnsignedTransaction> {
        let xdr = self
            .cli(
                ctx,
                &[
                    "contract",
                    "deploy",
                    "--wasm-hash",
                    wasm_hash,
                    "--salt",
                    salt_hex,
                    "--source-account",
                    ctx.source_address.as_str(),
                    "--network",
                    self.network.network.as_str(),
                    "--build-only",
                ],
                "building create transaction",
            )
            .await?;
        self.prepare(ctx, &xdr).await
    }

    async fn submit(&self, signed: &SignedTransaction) -> Result<Submission> {
        let result = self
            .rpc("sendTransaction", json!({ "transaction": signed.xdr }))
            .await?;
        let status = result.get("status").and_then(Value::as_str).unwrap_or("");
        let hash = result
            .get("hash")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match status {
            "PENDING" | "DUPLICATE" if !hash.is_empty() => Ok(Submission { hash }),
            other => Err(SandboxError::DeployFailed {
                message: format!("transaction rejected with status {}", other),
                diagnostics: Diagnostics::new(result.to_string(), String::new()),
            }),
        }
    }

    async fn transaction_status(&self, hash: &str) -> Result<TxStatus> {
        let result = self.rpc("getTransaction", json!({ "hash": hash })).await?;
        Ok(parse_transaction_status(&result))
    }

    async fn contract_id(&self, ctx: &LedgerContext, salt_hex: &str) -> Result<String> {
        self.cli(
            ctx,
            &[
                "contract",
                "id",
                "wasm",
                "--salt",
                salt_hex,
                "--source-account",
                ctx.source_address.as_str(),
                "--network",
                self.network.network.as_str(),
            ],
            "computing contract id",
        )
        .await
    }

    fn network_passphrase(&self) -> &str {
        &self.network.passphrase
    }
}

/// Map a `getTransaction` result onto a status
pub fn parse_transaction_status(result: &Value) -> TxStatus {
    match result.get("status").and_then(Value::as_str) {
        Some("SUCCESS") => TxStatus::Success {
            return_value: result
                .get("returnValue")
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        Some("FAILED") => TxStatus::Failed {
            detail: result
                .get("resultXdr")
                .and_then(Value::as_str)
                .unwrap_or("transaction failed")
                .to_string(),
        },
        Some("NOT_FOUND") => TxStatus::NotFound,
        _ => TxStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wasm_hash_is_sha256() {
        assert_eq!(
            wasm_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_is_account_address() {
        assert!(is_account_address(
            "GDLZFC3SYJYDZT7K67VZ75HPJVIEUVNIXF47ZG2FB2RMQQVU2HHGCYSC"
        ));
        assert!(!is_account_address("GABC"));
        assert!(!is_account_address(
            "CDLZFC3SYJYDZT7K67VZ75HPJVIEUVNIXF47ZG2FB2RMQQVU2HHGCYSC"
        ));
    }

    #[test]
    fn test_decode_bytes_return_value() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&SCV_BYTES.to_be_bytes());
        raw.extend_from_slice(&4u32.to_be_bytes());
        raw.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        let encoded = STANDARD.encode(&raw);
        assert_eq!(decode_bytes_return_value(&encoded).as_deref(), Some("deadbeef"));

        // Wrong discriminant
        raw[3] = 1;
        assert_eq!(decode_bytes_return_value(&STANDARD.encode(&raw)), None);
        assert_eq!(decode_bytes_return_value("not base64!"), None);
    }

    #[test]
    fn test_parse_transaction_status() {
        assert_eq!(
            parse_transaction_status(&json!({"status": "NOT_FOUND"})),
            TxStatus::NotFound
        );
        assert_eq!(
            parse_transaction_status(&json!({"status": "SUCCESS", "returnValue": "AAAA"})),
            TxStatus::Success {
                return_value: Some("AAAA".into())
            }
        );
        assert!(matches!(
            parse_transaction_status(&json!({"status": "FAILED"})),
            TxStatus::Failed { .. }
        ));
        assert_eq!(parse_transaction_status(&json!({})), TxStatus::Pending);
    }
}
