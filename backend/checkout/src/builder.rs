//! Transaction builder client.
//!
//! The build service turns a selection into an unsigned Stellar transaction.
//! It deduplicates on the idempotency key: the same key with the same
//! selection returns the same envelope, the same key with a different
//! selection is a conflict.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{BuildTransactionRequest, BuildTransactionResponse};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("transaction build failed: {0}")]
    BuildFailed(String),
    #[error("idempotency key reused with a different selection: {0}")]
    IdempotencyConflict(String),
}

#[async_trait]
pub trait TransactionBuilder: Send + Sync {
    async fn build(
        &self,
        request: &BuildTransactionRequest,
    ) -> Result<BuildTransactionResponse, BuildError>;
}

/// Talks to the build service over HTTP.
pub struct HttpTransactionBuilder {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(alias = "message")]
    error: String,
}

impl HttpTransactionBuilder {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            endpoint: format!("{}/transactions/build", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl TransactionBuilder for HttpTransactionBuilder {
    async fn build(
        &self,
        request: &BuildTransactionRequest,
    ) -> Result<BuildTransactionResponse, BuildError> {
        debug!(
            "Requesting build for key {} ({} on {})",
            request.idempotency_key, request.wallet_public_key, request.network
        );

        let resp = self
            .client
            .post(&self.endpoint)
            .header("Idempotency-Key", request.idempotency_key.as_str())
            .json(request)
            .send()
            .await
            .map_err(|e| BuildError::BuildFailed(format!("build service unreachable: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<BuildTransactionResponse>()
                .await
                .map_err(|e| BuildError::BuildFailed(format!("malformed build response: {e}")));
        }

        let message = resp
            .text()
            .await
            .ok()
            .and_then(|body| {
                serde_json::from_str::<ServiceError>(&body)
                    .map(|e| e.error)
                    .ok()
                    .or(Some(body))
            })
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| status.to_string());

        warn!("Build service answered {status}: {message}");
        Err(classify_status(status, message))
    }
}

fn classify_status(status: StatusCode, message: String) -> BuildError {
    if status == StatusCode::CONFLICT {
        BuildError::IdempotencyConflict(message)
    } else {
        BuildError::BuildFailed(message)
    }
}
