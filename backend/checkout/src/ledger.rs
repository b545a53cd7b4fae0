//! Ledger submission and confirmation.
//!
//! [`Ledger`] is the narrow contract the orchestrator consumes. The shipped
//! implementation, [`SorobanRpcLedger`], is a JSON-RPC client of a Soroban RPC
//! endpoint:
//!
//! * `sendTransaction`: `PENDING` / `DUPLICATE` yield the hash, `TRY_AGAIN_LATER`
//!   is transient, `ERROR` is a rejection.
//! * `getTransaction`: `SUCCESS` is final, `FAILED` is an on-chain failure,
//!   `NOT_FOUND` means not (yet) in a closed ledger.
//!
//! Connection failures before the request left this process are transient;
//! a request that timed out or broke mid-flight has an unknown outcome.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{SignedEnvelope, TxHash};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("submission failed transiently: {0}")]
    Transient(String),
    #[error("submission rejected by the network: {0}")]
    Rejected(String),
    #[error("submission outcome unknown: {0}")]
    OutcomeUnknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("ledger query failed: {0}")]
pub struct LedgerError(pub String);

/// What the ledger currently knows about a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerTxStatus {
    Pending,
    Finalized { ledger: Option<u64> },
    Failed(String),
}

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn submit(&self, envelope: &SignedEnvelope) -> Result<TxHash, SubmitError>;

    async fn transaction_status(&self, hash: &TxHash) -> Result<LedgerTxStatus, LedgerError>;
}

// ─────────────────────────────────────────────────────────
// JSON-RPC response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct SendTransactionResult {
    status: String,
    hash: Option<String>,
    #[serde(rename = "errorResultXdr")]
    error_result_xdr: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetTransactionResult {
    status: String,
    ledger: Option<u64>,
    #[serde(rename = "resultXdr")]
    result_xdr: Option<String>,
}

// ─────────────────────────────────────────────────────────
// Soroban RPC client
// ─────────────────────────────────────────────────────────

pub struct SorobanRpcLedger {
    client: Client,
    rpc_url: String,
}

impl SorobanRpcLedger {
    pub fn new(client: Client, rpc_url: impl Into<String>) -> Self {
        Self {
            client,
            rpc_url: rpc_url.into(),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<reqwest::Response, reqwest::Error> {
        self.client
            .post(&self.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params,
            }))
            .send()
            .await
    }
}

#[async_trait]
impl Ledger for SorobanRpcLedger {
    async fn submit(&self, envelope: &SignedEnvelope) -> Result<TxHash, SubmitError> {
        let resp = self
            .call("sendTransaction", json!({ "transaction": envelope.0 }))
            .await
            .map_err(classify_transport_error)?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(SubmitError::Transient(format!("RPC answered {status}")));
        }

        let body: RpcResponse<SendTransactionResult> = resp
            .json()
            .await
            .map_err(|e| SubmitError::OutcomeUnknown(format!("unreadable RPC response: {e}")))?;

        if let Some(err) = body.error {
            warn!("sendTransaction RPC error {}: {}", err.code, err.message);
            let detail = format!("RPC error {}: {}", err.code, err.message);
            // Malformed request / params: resending the same envelope cannot help.
            if matches!(err.code, -32600 | -32601 | -32602) {
                return Err(SubmitError::Rejected(detail));
            }
            return Err(SubmitError::Transient(detail));
        }
        let result = body
            .result
            .ok_or_else(|| SubmitError::OutcomeUnknown("empty sendTransaction result".to_string()))?;

        debug!("sendTransaction status={} hash={:?}", result.status, result.hash);
        interpret_send_result(result)
    }

    async fn transaction_status(&self, hash: &TxHash) -> Result<LedgerTxStatus, LedgerError> {
        let resp = self
            .call("getTransaction", json!({ "hash": hash.as_str() }))
            .await
            .map_err(|e| LedgerError(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(LedgerError(format!("RPC answered {status}")));
        }

        let body: RpcResponse<GetTransactionResult> =
            resp.json().await.map_err(|e| LedgerError(e.to_string()))?;
        if let Some(err) = body.error {
            return Err(LedgerError(format!("RPC error {}: {}", err.code, err.message)));
        }
        let result = body
            .result
            .ok_or_else(|| LedgerError("empty getTransaction result".to_string()))?;

        interpret_get_result(result)
    }
}

fn classify_transport_error(e: reqwest::Error) -> SubmitError {
    if e.is_connect() || e.is_builder() {
        SubmitError::Transient(e.to_string())
    } else {
        // Sent (or partly sent) without a reply: the network may have it.
        SubmitError::OutcomeUnknown(e.to_string())
    }
}

fn interpret_send_result(result: SendTransactionResult) -> Result<TxHash, SubmitError> {
    match result.status.as_str() {
        "PENDING" | "DUPLICATE" => result
            .hash
            .filter(|h| !h.is_empty())
            .map(TxHash)
            .ok_or_else(|| {
                SubmitError::OutcomeUnknown(format!("{} without a transaction hash", result.status))
            }),
        "TRY_AGAIN_LATER" => Err(SubmitError::Transient("RPC asked to try again later".to_string())),
        "ERROR" => Err(SubmitError::Rejected(
            result
                .error_result_xdr
                .unwrap_or_else(|| "transaction rejected".to_string()),
        )),
        other => Err(SubmitError::OutcomeUnknown(format!(
            "unexpected sendTransaction status '{other}'"
        ))),
    }
}

fn interpret_get_result(result: GetTransactionResult) -> Result<LedgerTxStatus, LedgerError> {
    match result.status.as_str() {
        "SUCCESS" => Ok(LedgerTxStatus::Finalized {
            ledger: result.ledger,
        }),
        "FAILED" => Ok(LedgerTxStatus::Failed(
            result
                .result_xdr
                .unwrap_or_else(|| "transaction failed on-chain".to_string()),
        )),
        "NOT_FOUND" => Ok(LedgerTxStatus::Pending),
        other => Err(LedgerError(format!(
            "unexpected getTransaction status '{other}'"
        ))),
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
