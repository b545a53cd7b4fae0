//! # Payment orchestrator
//!
//! Drives one purchase attempt through
//! `preparing → signing → submitting → confirming → success | error`
//! and publishes the [`PaymentState`] after every transition.
//!
//! ## Idempotency
//!
//! The key is generated on `idle → preparing` and stamped onto the state
//! before anything leaves the process. Retries reuse it; only a reset followed
//! by a new start produces a new one. Once a transaction hash is known a retry
//! polls that hash again and never rebuilds or re-signs.
//!
//! ## Cancellation
//!
//! Each attempt carries a [`CancellationToken`]. Building and signing race
//! against it; the `signing → submitting` step re-checks it under the state
//! lock, so nothing is submitted after a cancel was accepted. From
//! `submitting` on, cancel is refused.
//!
//! ## Checkpointing
//!
//! With a [`Checkpointer`] attached, every transition is saved before the
//! state lock is released. The `signing → submitting` and
//! `submitting → confirming` saves gate the next step: if either fails the
//! attempt ends in `error: CheckpointFailed` instead of reaching the ledger
//! (or polling a hash nobody recorded).
//!
//! ## Locking
//!
//! The state mutex is held for bookkeeping and checkpoint writes only.
//! Builder, wallet and ledger calls run outside it, so `cancel` and readers
//! never wait behind the network.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::builder::{BuildError, TransactionBuilder};
use crate::checkpoint::Checkpointer;
use crate::errors::CheckoutError;
use crate::ledger::{Ledger, LedgerTxStatus, SubmitError};
use crate::types::{
    BuildTransactionRequest, CreditSelectionState, IdempotencyKey, PaymentErrorReason,
    PaymentFailure, PaymentState, TransactionStatus, TxHash,
};
use crate::wallet::{WalletConnector, WalletError};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on a single ledger submission call.
    pub submit_timeout: Duration,
    /// How long `confirming` may last before the outcome is reported unknown.
    pub confirmation_timeout: Duration,
    pub confirmation_poll_interval: Duration,
    /// User-triggered retries allowed per attempt.
    pub max_retries: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            submit_timeout: Duration::from_secs(30),
            confirmation_timeout: Duration::from_secs(60),
            confirmation_poll_interval: Duration::from_secs(2),
            max_retries: 3,
        }
    }
}

/// Why a call on the orchestrator was refused. The state is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    #[error("a purchase attempt is already in progress ({0})")]
    AttemptInProgress(TransactionStatus),
    #[error("no project selected")]
    NoSelection,
    #[error("wallet is not connected")]
    NotConnected,
    #[error("cannot {action} while {status}")]
    InvalidTransition {
        action: &'static str,
        status: TransactionStatus,
    },
    #[error("{0} is not retryable; reset and start a new purchase")]
    NotRetryable(PaymentErrorReason),
    #[error("retry limit of {0} reached")]
    RetryLimitReached(u32),
    #[error("cannot cancel while {0}: the transaction may already be on the network")]
    CancellationRefused(TransactionStatus),
    #[error("nothing to cancel while {0}")]
    NothingToCancel(TransactionStatus),
    #[error("wallet account or network changed since the attempt started; reset and start a new purchase")]
    WalletChanged,
}

impl From<BuildError> for PaymentFailure {
    fn from(e: BuildError) -> Self {
        match e {
            BuildError::BuildFailed(m) => Self::new(PaymentErrorReason::BuildFailed, m),
            BuildError::IdempotencyConflict(m) => {
                Self::new(PaymentErrorReason::IdempotencyConflict, m)
            }
        }
    }
}

impl From<WalletError> for PaymentFailure {
    fn from(e: WalletError) -> Self {
        let reason = match e {
            WalletError::SigningRejected => PaymentErrorReason::SigningRejected,
            WalletError::NotConnected => PaymentErrorReason::NotConnected,
            _ => PaymentErrorReason::SigningError,
        };
        Self::new(reason, e.to_string())
    }
}

impl From<CheckoutError> for PaymentFailure {
    fn from(e: CheckoutError) -> Self {
        Self::new(
            PaymentErrorReason::CheckpointFailed,
            format!("could not save progress: {e}"),
        )
    }
}

impl From<SubmitError> for PaymentFailure {
    fn from(e: SubmitError) -> Self {
        let reason = match e {
            SubmitError::Transient(_) => PaymentErrorReason::SubmissionTransient,
            SubmitError::Rejected(_) => PaymentErrorReason::SubmissionRejected,
            SubmitError::OutcomeUnknown(_) => PaymentErrorReason::SubmissionOutcomeUnknown,
        };
        Self::new(reason, e.to_string())
    }
}

type Observer = Box<dyn Fn(&PaymentState) + Send + Sync>;

struct Inner {
    state: PaymentState,
    cancel: Option<CancellationToken>,
    observers: Vec<Observer>,
}

impl Inner {
    fn emit(&self) {
        for observer in &self.observers {
            observer(&self.state);
        }
    }
}

enum Entry {
    Prepare,
    Confirm(TxHash),
    Settled,
}

/// An accepted transition into a running attempt. Hand it to
/// [`PaymentOrchestrator::run`] (directly or from a spawned task).
#[must_use = "an attempt does nothing until it is run"]
pub struct Attempt {
    token: CancellationToken,
    entry: Entry,
}

pub struct PaymentOrchestrator {
    builder: Arc<dyn TransactionBuilder>,
    wallet: Arc<WalletConnector>,
    ledger: Arc<dyn Ledger>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    config: OrchestratorConfig,
    inner: Mutex<Inner>,
}

impl PaymentOrchestrator {
    pub fn new(
        builder: Arc<dyn TransactionBuilder>,
        wallet: Arc<WalletConnector>,
        ledger: Arc<dyn Ledger>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            builder,
            wallet,
            ledger,
            checkpointer: None,
            config,
            inner: Mutex::new(Inner {
                state: PaymentState::default(),
                cancel: None,
                observers: Vec::new(),
            }),
        }
    }

    /// Save every transition through `checkpointer` before moving on.
    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Register a callback run after every transition, in order.
    pub async fn on_transition<F>(&self, observer: F)
    where
        F: Fn(&PaymentState) + Send + Sync + 'static,
    {
        self.inner.lock().await.observers.push(Box::new(observer));
    }

    pub async fn state(&self) -> PaymentState {
        self.inner.lock().await.state.clone()
    }

    // ─────────────────────────────────────────────────────────
    // Entry points
    // ─────────────────────────────────────────────────────────

    /// Start a new attempt and run it to a terminal state.
    pub async fn start_purchase(
        &self,
        selection: CreditSelectionState,
    ) -> Result<PaymentState, OrchestratorError> {
        let attempt = self.begin_purchase(selection).await?;
        Ok(self.run(attempt).await)
    }

    /// Continue a failed attempt with the same key (or the same hash).
    pub async fn retry(&self) -> Result<PaymentState, OrchestratorError> {
        let attempt = self.begin_retry().await?;
        Ok(self.run(attempt).await)
    }

    /// Pick up a persisted state after a restart.
    pub async fn resume(&self, saved: PaymentState) -> Result<PaymentState, OrchestratorError> {
        let attempt = self.begin_resume(saved).await?;
        Ok(self.run(attempt).await)
    }

    /// `idle → preparing`: stamp a fresh idempotency key.
    pub async fn begin_purchase(
        &self,
        selection: CreditSelectionState,
    ) -> Result<Attempt, OrchestratorError> {
        let mut inner = self.inner.lock().await;
        let status = inner.state.status;
        if status.is_in_flight() {
            return Err(OrchestratorError::AttemptInProgress(status));
        }
        if status != TransactionStatus::Idle {
            return Err(OrchestratorError::InvalidTransition {
                action: "start a purchase",
                status,
            });
        }
        if selection.project_id.is_none() || selection.quantity <= Decimal::ZERO {
            return Err(OrchestratorError::NoSelection);
        }
        let wallet = self
            .wallet
            .snapshot()
            .filter(|w| w.is_connected)
            .ok_or(OrchestratorError::NotConnected)?;

        let key = IdempotencyKey::generate();
        info!(
            "Starting purchase {key}: {} t of {:?} for {}",
            selection.quantity, selection.project_id, selection.calculated_price
        );
        inner.state = PaymentState {
            selection,
            wallet: Some(wallet),
            status: TransactionStatus::Preparing,
            transaction_hash: None,
            error: None,
            idempotency_key: Some(key),
            retries: 0,
        };
        Ok(self.arm(&mut inner, Entry::Prepare).await)
    }

    /// `error → preparing | confirming` for retry-eligible failures.
    pub async fn begin_retry(&self) -> Result<Attempt, OrchestratorError> {
        let mut inner = self.inner.lock().await;
        let status = inner.state.status;
        if status.is_in_flight() {
            return Err(OrchestratorError::AttemptInProgress(status));
        }
        let reason = match (&inner.state.error, status) {
            (Some(failure), TransactionStatus::Error) => failure.reason,
            _ => {
                return Err(OrchestratorError::InvalidTransition {
                    action: "retry",
                    status,
                })
            }
        };
        if !reason.is_retryable() {
            return Err(OrchestratorError::NotRetryable(reason));
        }
        if inner.state.retries >= self.config.max_retries {
            return Err(OrchestratorError::RetryLimitReached(self.config.max_retries));
        }

        let entry = match inner.state.transaction_hash.clone() {
            Some(hash) => {
                info!("Retry: polling existing transaction {hash}");
                inner.state.status = TransactionStatus::Confirming;
                Entry::Confirm(hash)
            }
            None => {
                let wallet = self
                    .wallet
                    .snapshot()
                    .filter(|w| w.is_connected)
                    .ok_or(OrchestratorError::NotConnected)?;
                if let Some(bound) = &inner.state.wallet {
                    if bound.public_key != wallet.public_key || bound.network != wallet.network {
                        warn!(
                            "Refusing retry: attempt was bound to {} on {}, wallet is now {} on {}",
                            bound.public_key, bound.network, wallet.public_key, wallet.network
                        );
                        return Err(OrchestratorError::WalletChanged);
                    }
                }
                info!(
                    "Retry: rebuilding with key {:?} after {reason}",
                    inner.state.idempotency_key.as_ref().map(IdempotencyKey::as_str)
                );
                inner.state.wallet = Some(wallet);
                inner.state.status = TransactionStatus::Preparing;
                Entry::Prepare
            }
        };
        inner.state.retries += 1;
        inner.state.error = None;
        Ok(self.arm(&mut inner, entry).await)
    }

    /// Restore a persisted state.
    ///
    /// A recorded hash is only ever polled. An attempt interrupted mid-submit
    /// without a hash is surfaced as an unknown outcome; one interrupted before
    /// submitting becomes a retryable `Interrupted` error with the same key.
    pub async fn begin_resume(&self, saved: PaymentState) -> Result<Attempt, OrchestratorError> {
        let mut inner = self.inner.lock().await;
        let status = inner.state.status;
        if status.is_in_flight() {
            return Err(OrchestratorError::AttemptInProgress(status));
        }

        let mut state = saved;
        let entry = match (state.status, state.transaction_hash.clone()) {
            (TransactionStatus::Submitting | TransactionStatus::Confirming, Some(hash)) => {
                info!("Resuming confirmation of {hash}");
                state.status = TransactionStatus::Confirming;
                state.error = None;
                Entry::Confirm(hash)
            }
            (TransactionStatus::Submitting | TransactionStatus::Confirming, None) => {
                warn!("Attempt was interrupted while submitting; outcome unknown");
                state.status = TransactionStatus::Error;
                state.error = Some(PaymentFailure::new(
                    PaymentErrorReason::SubmissionOutcomeUnknown,
                    "interrupted while submitting; the transaction may have reached the network",
                ));
                Entry::Settled
            }
            (TransactionStatus::Preparing | TransactionStatus::Signing, _) => {
                info!("Attempt was interrupted while {}; nothing was submitted", state.status);
                state.error = Some(PaymentFailure::new(
                    PaymentErrorReason::Interrupted,
                    format!("interrupted while {}", state.status),
                ));
                state.status = TransactionStatus::Error;
                Entry::Settled
            }
            _ => Entry::Settled,
        };
        inner.state = state;
        Ok(self.arm(&mut inner, entry).await)
    }

    /// Drive an accepted attempt until it settles; returns the final state.
    pub async fn run(&self, attempt: Attempt) -> PaymentState {
        match attempt.entry {
            Entry::Prepare => self.prepare_and_submit(&attempt.token).await,
            Entry::Confirm(hash) => self.confirm(&attempt.token, hash).await,
            Entry::Settled => {}
        }
        self.state().await
    }

    /// Abort an attempt that has not reached the network yet.
    pub async fn cancel(&self) -> Result<PaymentState, OrchestratorError> {
        let mut inner = self.inner.lock().await;
        let status = inner.state.status;
        if status.is_cancellable() {
            info!("Purchase cancelled while {status}");
            inner.state.status = TransactionStatus::Error;
            inner.state.error = Some(PaymentFailure::new(
                PaymentErrorReason::Cancelled,
                format!("cancelled by user while {status}"),
            ));
            if let Some(token) = inner.cancel.take() {
                token.cancel();
            }
            self.publish_logged(&inner).await;
            return Ok(inner.state.clone());
        }
        if status.is_in_flight() {
            Err(OrchestratorError::CancellationRefused(status))
        } else {
            Err(OrchestratorError::NothingToCancel(status))
        }
    }

    /// Return to `idle`, dropping the finished attempt.
    pub async fn reset(&self) -> Result<PaymentState, OrchestratorError> {
        let mut inner = self.inner.lock().await;
        let status = inner.state.status;
        if status.is_in_flight() {
            return Err(OrchestratorError::AttemptInProgress(status));
        }
        if let Some(failure) = inner
            .state
            .error
            .as_ref()
            .filter(|f| f.reason.is_unknown_outcome())
        {
            warn!(
                "Discarding attempt {:?} with unresolved outcome ({}), hash {:?}; verify on the ledger before buying again",
                inner.state.idempotency_key.as_ref().map(IdempotencyKey::as_str),
                failure.reason,
                inner.state.transaction_hash.as_ref().map(TxHash::as_str)
            );
        }
        inner.state = PaymentState::default();
        inner.cancel = None;
        self.publish_logged(&inner).await;
        Ok(inner.state.clone())
    }

    // ─────────────────────────────────────────────────────────
    // Transitions
    // ─────────────────────────────────────────────────────────

    async fn arm(&self, inner: &mut Inner, entry: Entry) -> Attempt {
        let token = CancellationToken::new();
        inner.cancel = Some(token.clone());
        self.publish_logged(inner).await;
        Attempt { token, entry }
    }

    /// Notify observers, then save the state.
    async fn publish(&self, inner: &Inner) -> Result<(), CheckoutError> {
        inner.emit();
        match &self.checkpointer {
            Some(store) => store.save(&inner.state).await,
            None => Ok(()),
        }
    }

    async fn publish_logged(&self, inner: &Inner) {
        if let Err(e) = self.publish(inner).await {
            error!("Failed to checkpoint payment state ({}): {e}", inner.state.status);
        }
    }

    async fn prepare_and_submit(&self, token: &CancellationToken) {
        let request = {
            let inner = self.inner.lock().await;
            let state = &inner.state;
            match (&state.wallet, &state.idempotency_key) {
                (Some(wallet), Some(key)) => Some(BuildTransactionRequest {
                    selection: state.selection.clone(),
                    wallet_public_key: wallet.public_key.clone(),
                    network: wallet.network,
                    idempotency_key: key.clone(),
                }),
                _ => None,
            }
        };
        let Some(request) = request else {
            return self
                .fail(
                    token,
                    PaymentFailure::new(
                        PaymentErrorReason::Interrupted,
                        "attempt lost its wallet or idempotency key",
                    ),
                )
                .await;
        };

        let built = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            built = self.builder.build(&request) => built,
        };
        let response = match built {
            Ok(response) => response,
            Err(e) => return self.fail(token, e.into()).await,
        };
        if response.network_passphrase != request.network.passphrase() {
            return self
                .fail(
                    token,
                    PaymentFailure::new(
                        PaymentErrorReason::NetworkMismatch,
                        format!(
                            "builder targeted '{}' but the wallet is on {}",
                            response.network_passphrase, request.network
                        ),
                    ),
                )
                .await;
        }

        if !self
            .advance(token, TransactionStatus::Preparing, TransactionStatus::Signing)
            .await
        {
            return;
        }

        let signed = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            signed = self.wallet.sign(&response.transaction_xdr, &response.network_passphrase) => signed,
        };
        let signed = match signed {
            Ok(signed) => signed,
            Err(e) => return self.fail(token, e.into()).await,
        };

        if !self
            .advance(token, TransactionStatus::Signing, TransactionStatus::Submitting)
            .await
        {
            return;
        }

        let submitted =
            tokio::time::timeout(self.config.submit_timeout, self.ledger.submit(&signed)).await;
        let hash = match submitted {
            Ok(Ok(hash)) => hash,
            Ok(Err(e)) => return self.fail(token, e.into()).await,
            Err(_) => {
                return self
                    .fail(
                        token,
                        PaymentFailure::new(
                            PaymentErrorReason::SubmissionOutcomeUnknown,
                            format!(
                                "no answer from the ledger within {:?}",
                                self.config.submit_timeout
                            ),
                        ),
                    )
                    .await
            }
        };

        {
            let mut inner = self.inner.lock().await;
            info!("Submitted {hash}; awaiting confirmation");
            inner.state.transaction_hash = Some(hash.clone());
            inner.state.status = TransactionStatus::Confirming;
            if let Err(e) = self.publish(&inner).await {
                self.record_failure(&mut inner, e.into()).await;
                return;
            }
        }

        self.confirm(token, hash).await;
    }

    async fn confirm(&self, token: &CancellationToken, hash: TxHash) {
        let polled = tokio::time::timeout(
            self.config.confirmation_timeout,
            self.poll_until_settled(&hash),
        )
        .await;

        match polled {
            Ok(LedgerTxStatus::Failed(detail)) => {
                self.fail(
                    token,
                    PaymentFailure::new(PaymentErrorReason::ConfirmationFailed, detail),
                )
                .await
            }
            Ok(_) => {
                let mut inner = self.inner.lock().await;
                info!("Transaction {hash} finalized");
                inner.state.status = TransactionStatus::Success;
                inner.state.error = None;
                self.publish_logged(&inner).await;
            }
            Err(_) => {
                self.fail(
                    token,
                    PaymentFailure::new(
                        PaymentErrorReason::ConfirmationTimeout,
                        format!(
                            "outcome unknown: {hash} not final after {:?}; verify it on the ledger",
                            self.config.confirmation_timeout
                        ),
                    ),
                )
                .await
            }
        }
    }

    /// Poll until the ledger reports anything other than pending.
    async fn poll_until_settled(&self, hash: &TxHash) -> LedgerTxStatus {
        loop {
            match self.ledger.transaction_status(hash).await {
                Ok(LedgerTxStatus::Pending) => debug!("{hash} still pending"),
                Ok(settled) => return settled,
                Err(e) => warn!("Status query for {hash} failed: {e}"),
            }
            tokio::time::sleep(self.config.confirmation_poll_interval).await;
        }
    }

    /// Move `from → to` unless the attempt was cancelled meanwhile. A failed
    /// save ends the attempt instead.
    async fn advance(
        &self,
        token: &CancellationToken,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> bool {
        let mut inner = self.inner.lock().await;
        if token.is_cancelled() || inner.state.status != from {
            debug!("Dropping {from} → {to}: attempt no longer current");
            return false;
        }
        debug!("{from} → {to}");
        inner.state.status = to;
        match self.publish(&inner).await {
            Ok(()) => true,
            Err(e) => {
                self.record_failure(&mut inner, e.into()).await;
                false
            }
        }
    }

    async fn fail(&self, token: &CancellationToken, failure: PaymentFailure) {
        let mut inner = self.inner.lock().await;
        if token.is_cancelled() {
            debug!("Ignoring {failure} from a cancelled attempt");
            return;
        }
        self.record_failure(&mut inner, failure).await;
    }

    async fn record_failure(&self, inner: &mut Inner, failure: PaymentFailure) {
        warn!(
            "Purchase {:?} failed while {}: {failure}",
            inner.state.idempotency_key.as_ref().map(IdempotencyKey::as_str),
            inner.state.status
        );
        inner.state.status = TransactionStatus::Error;
        inner.state.error = Some(failure);
        self.publish_logged(inner).await;
    }
}
