//! In-memory collaborators for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::sync::{Notify, Semaphore};

use crate::builder::{BuildError, TransactionBuilder};
use crate::checkpoint::{run_migrations, Checkpointer};
use crate::errors::CheckoutError;
use crate::ledger::{Ledger, LedgerError, LedgerTxStatus, SubmitError};
use crate::types::{
    BuildTransactionRequest, BuildTransactionResponse, CreditSelectionState, IdempotencyKey,
    Network, PaymentState, SignedEnvelope, TransactionEnvelope, TransactionStatus, TxHash,
    WalletBalance, WalletKind,
};
use crate::wallet::{WalletError, WalletProvider};

/// Blocks a call until the test releases it, and tells the test when the call
/// has started.
pub struct Gate {
    entered: Notify,
    permits: Semaphore,
    armed: AtomicBool,
}

impl Default for Gate {
    fn default() -> Self {
        Self {
            entered: Notify::new(),
            permits: Semaphore::new(0),
            armed: AtomicBool::new(false),
        }
    }
}

impl Gate {
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub async fn pass(&self) {
        if self.armed.load(Ordering::SeqCst) {
            self.entered.notify_one();
            if let Ok(permit) = self.permits.acquire().await {
                permit.forget();
            }
        }
    }

    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.permits.add_permits(1);
    }
}

// ─────────────────────────────────────────────────────────
// Wallet
// ─────────────────────────────────────────────────────────

pub struct MockWallet {
    kind: WalletKind,
    public_key: String,
    reject_access: Mutex<bool>,
    reject_switch: Mutex<bool>,
    fail_balances: Mutex<bool>,
    balance: Mutex<WalletBalance>,
    sign_script: Mutex<VecDeque<Result<(), WalletError>>>,
    pub sign_calls: AtomicUsize,
    pub sign_gate: Gate,
}

impl MockWallet {
    pub fn new(kind: WalletKind, public_key: &str) -> Self {
        Self {
            kind,
            public_key: public_key.to_string(),
            reject_access: Mutex::new(false),
            reject_switch: Mutex::new(false),
            fail_balances: Mutex::new(false),
            balance: Mutex::new(WalletBalance::default()),
            sign_script: Mutex::new(VecDeque::new()),
            sign_calls: AtomicUsize::new(0),
            sign_gate: Gate::default(),
        }
    }

    pub fn reject_access(&self) {
        *self.reject_access.lock().unwrap() = true;
    }

    pub fn reject_network_switch(&self) {
        *self.reject_switch.lock().unwrap() = true;
    }

    pub fn fail_balances(&self) {
        *self.fail_balances.lock().unwrap() = true;
    }

    pub fn set_balance(&self, xlm: Decimal, usdc: Decimal) {
        *self.balance.lock().unwrap() = WalletBalance { xlm, usdc };
    }

    /// Queue the outcome of the next `sign` call; unscripted calls succeed.
    pub fn script_sign(&self, outcome: Result<(), WalletError>) {
        self.sign_script.lock().unwrap().push_back(outcome);
    }

    pub fn sign_count(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletProvider for MockWallet {
    fn kind(&self) -> WalletKind {
        self.kind
    }

    async fn request_access(&self, _network: Network) -> Result<String, WalletError> {
        if *self.reject_access.lock().unwrap() {
            return Err(WalletError::UserRejected);
        }
        Ok(self.public_key.clone())
    }

    async fn switch_network(&self, network: Network) -> Result<(), WalletError> {
        if *self.reject_switch.lock().unwrap() {
            return Err(WalletError::NetworkSwitchFailed(format!(
                "user declined switching to {network}"
            )));
        }
        Ok(())
    }

    async fn balances(
        &self,
        _public_key: &str,
        _network: Network,
    ) -> Result<WalletBalance, WalletError> {
        if *self.fail_balances.lock().unwrap() {
            return Err(WalletError::BalanceFetchFailed("horizon down".to_string()));
        }
        Ok(self.balance.lock().unwrap().clone())
    }

    async fn sign(
        &self,
        envelope: &TransactionEnvelope,
        _network_passphrase: &str,
    ) -> Result<SignedEnvelope, WalletError> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        self.sign_gate.pass().await;
        let scripted = self.sign_script.lock().unwrap().pop_front();
        match scripted {
            Some(Err(e)) => Err(e),
            _ => Ok(SignedEnvelope(format!("{}+sig", envelope.0))),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────

/// Deduplicates by key like the real build service.
pub struct MockBuilder {
    script: Mutex<VecDeque<BuildError>>,
    issued: Mutex<HashMap<IdempotencyKey, CreditSelectionState>>,
    pub requests: Mutex<Vec<BuildTransactionRequest>>,
    passphrase_override: Mutex<Option<String>>,
    pub gate: Gate,
}

impl MockBuilder {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            issued: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            passphrase_override: Mutex::new(None),
            gate: Gate::default(),
        }
    }

    /// Make the next build call fail with `error`.
    pub fn fail_next(&self, error: BuildError) {
        self.script.lock().unwrap().push_back(error);
    }

    pub fn answer_with_passphrase(&self, passphrase: &str) {
        *self.passphrase_override.lock().unwrap() = Some(passphrase.to_string());
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn keys(&self) -> Vec<IdempotencyKey> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.idempotency_key.clone())
            .collect()
    }
}

#[async_trait]
impl TransactionBuilder for MockBuilder {
    async fn build(
        &self,
        request: &BuildTransactionRequest,
    ) -> Result<BuildTransactionResponse, BuildError> {
        self.requests.lock().unwrap().push(request.clone());
        self.gate.pass().await;

        if let Some(err) = self.script.lock().unwrap().pop_front() {
            return Err(err);
        }

        {
            let mut issued = self.issued.lock().unwrap();
            match issued.get(&request.idempotency_key) {
                Some(previous) if previous != &request.selection => {
                    return Err(BuildError::IdempotencyConflict(format!(
                        "key {} already used",
                        request.idempotency_key
                    )));
                }
                Some(_) => {}
                None => {
                    issued.insert(request.idempotency_key.clone(), request.selection.clone());
                }
            }
        }

        let passphrase = self
            .passphrase_override
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| request.network.passphrase().to_string());

        Ok(BuildTransactionResponse {
            transaction_xdr: TransactionEnvelope(format!("XDR-{}", request.idempotency_key)),
            network_passphrase: passphrase,
        })
    }
}

// ─────────────────────────────────────────────────────────
// Ledger
// ─────────────────────────────────────────────────────────

pub enum SubmitOutcome {
    Accept(&'static str),
    Fail(SubmitError),
    /// Never answers; the orchestrator's submit timeout has to fire.
    Hang,
}

pub struct MockLedger {
    submit_script: Mutex<VecDeque<SubmitOutcome>>,
    status_script: Mutex<VecDeque<Result<LedgerTxStatus, LedgerError>>>,
    /// Status returned once the script is exhausted.
    settled_status: Mutex<LedgerTxStatus>,
    pub submitted: Mutex<Vec<SignedEnvelope>>,
    pub polled: Mutex<Vec<TxHash>>,
    pub submit_gate: Gate,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            submit_script: Mutex::new(VecDeque::new()),
            status_script: Mutex::new(VecDeque::new()),
            settled_status: Mutex::new(LedgerTxStatus::Finalized { ledger: Some(1) }),
            submitted: Mutex::new(Vec::new()),
            polled: Mutex::new(Vec::new()),
            submit_gate: Gate::default(),
        }
    }

    pub fn on_submit(&self, outcome: SubmitOutcome) {
        self.submit_script.lock().unwrap().push_back(outcome);
    }

    pub fn on_status(&self, status: Result<LedgerTxStatus, LedgerError>) {
        self.status_script.lock().unwrap().push_back(status);
    }

    /// Status once scripted answers run out (default: finalized).
    pub fn settle_as(&self, status: LedgerTxStatus) {
        *self.settled_status.lock().unwrap() = status;
    }

    pub fn submit_count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    pub fn polled_hashes(&self) -> Vec<TxHash> {
        self.polled.lock().unwrap().clone()
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn submit(&self, envelope: &SignedEnvelope) -> Result<TxHash, SubmitError> {
        self.submitted.lock().unwrap().push(envelope.clone());
        self.submit_gate.pass().await;
        let outcome = self.submit_script.lock().unwrap().pop_front();
        match outcome {
            None => Ok(TxHash(format!("hash:{}", envelope.0))),
            Some(SubmitOutcome::Accept(hash)) => Ok(TxHash(hash.to_string())),
            Some(SubmitOutcome::Fail(e)) => Err(e),
            Some(SubmitOutcome::Hang) => std::future::pending().await,
        }
    }

    async fn transaction_status(&self, hash: &TxHash) -> Result<LedgerTxStatus, LedgerError> {
        self.polled.lock().unwrap().push(hash.clone());
        let scripted = self.status_script.lock().unwrap().pop_front();
        match scripted {
            Some(status) => status,
            None => Ok(self.settled_status.lock().unwrap().clone()),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Checkpoint
// ─────────────────────────────────────────────────────────

/// Fresh migrated SQLite database held in memory.
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

/// Records every saved state; can be told to refuse writes.
#[derive(Default)]
pub struct MemoryCheckpoint {
    pub saved: Mutex<Vec<PaymentState>>,
    failing: AtomicBool,
}

impl MemoryCheckpoint {
    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn statuses(&self) -> Vec<TransactionStatus> {
        self.saved.lock().unwrap().iter().map(|s| s.status).collect()
    }
}

#[async_trait]
impl Checkpointer for MemoryCheckpoint {
    async fn save(&self, state: &PaymentState) -> crate::errors::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CheckoutError::Database(sqlx::Error::PoolClosed));
        }
        self.saved.lock().unwrap().push(state.clone());
        Ok(())
    }
}
