//! # Types
//!
//! Shared data structures used across the checkout modules.
//!
//! ## Money
//!
//! Prices, quantities and totals are exact decimals. Every derived amount goes
//! through [`round2`]: two decimal places, midpoint rounded away from zero.
//! `calculated_price` and a preview's `total_amount` use the same rule so the
//! quote the user saw is the amount the builder is asked for.
//!
//! ## Payment lifecycle
//!
//! [`TransactionStatus`] is a forward-only machine per purchase attempt:
//!
//! ```text
//! Idle ──► Preparing ──► Signing ──► Submitting ──► Confirming ──► Success
//!              │            │             │              │
//!              └────────────┴─────────────┴──────────────┴──► Error
//! ```
//!
//! `Success` and `Error` are terminal for the attempt; only a reset returns to
//! `Idle`. A retry from `Error` re-enters `Preparing` (same idempotency key) or
//! `Confirming` (same transaction hash).

use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Round a monetary amount to cents, midpoint away from zero.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

// ─────────────────────────────────────────────────────────
// Catalog
// ─────────────────────────────────────────────────────────

/// A purchasable batch of tokenized carbon credits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarbonProject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Year the credits were generated.
    pub vintage_year: u16,
    pub price_per_ton: Decimal,
    /// Tons still available; may be fractional.
    pub available_supply: Decimal,
    #[serde(default)]
    pub is_out_of_stock: bool,
}

impl CarbonProject {
    /// Whether the project can currently be bought at all.
    pub fn is_purchasable(&self) -> bool {
        !self.is_out_of_stock && self.available_supply > Decimal::ZERO
    }
}

/// The user's in-progress choice of project and quantity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditSelectionState {
    pub project_id: Option<String>,
    pub quantity: Decimal,
    pub calculated_price: Decimal,
}

impl CreditSelectionState {
    pub fn is_empty(&self) -> bool {
        self.project_id.is_none()
    }
}

/// Human-readable summary shown before the user signs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPreview {
    pub project_name: String,
    pub quantity: Decimal,
    pub price_per_ton: Decimal,
    pub total_amount: Decimal,
    pub payment_asset: String,
    pub recipient_address: String,
}

// ─────────────────────────────────────────────────────────
// Network & wallet
// ─────────────────────────────────────────────────────────

/// Stellar network a wallet is bound to and a transaction targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Testnet,
    Mainnet,
}

impl Network {
    /// The network passphrase transactions for this network are signed over.
    pub fn passphrase(&self) -> &'static str {
        match self {
            Self::Testnet => "Test SDF Network ; September 2015",
            Self::Mainnet => "Public Global Stellar Network ; September 2015",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Testnet => "testnet",
            Self::Mainnet => "mainnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "testnet" => Ok(Self::Testnet),
            "mainnet" | "public" => Ok(Self::Mainnet),
            other => Err(format!("unknown network '{other}'")),
        }
    }
}

/// Vendor of the signing capability, chosen when connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletKind {
    Freighter,
    Albedo,
    Custodial,
}

impl WalletKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Freighter => "freighter",
            Self::Albedo => "albedo",
            Self::Custodial => "custodial",
        }
    }
}

impl fmt::Display for WalletKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WalletKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "freighter" => Ok(Self::Freighter),
            "albedo" => Ok(Self::Albedo),
            "custodial" => Ok(Self::Custodial),
            other => Err(format!("unknown wallet kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WalletBalance {
    pub xlm: Decimal,
    pub usdc: Decimal,
}

/// Point-in-time view of a live wallet binding.
///
/// `public_key` is non-empty exactly when `is_connected` is true; the
/// connector only ever builds connected snapshots through [`WalletConnection::connected`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletConnection {
    #[serde(rename = "type")]
    pub kind: WalletKind,
    pub public_key: String,
    pub network: Network,
    pub is_connected: bool,
    pub balance: WalletBalance,
}

impl WalletConnection {
    pub fn connected(
        kind: WalletKind,
        public_key: String,
        network: Network,
        balance: WalletBalance,
    ) -> Self {
        let is_connected = !public_key.is_empty();
        Self {
            kind,
            public_key,
            network,
            is_connected,
            balance,
        }
    }
}

// ─────────────────────────────────────────────────────────
// Transaction building
// ─────────────────────────────────────────────────────────

/// Token that makes repeated build requests for one purchase attempt collapse
/// into a single on-chain transfer.
///
/// Always non-empty: either freshly generated (128 random bits, hex) or
/// parsed from a non-empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().is_empty() {
            return Err("idempotency key must not be empty".to_string());
        }
        Ok(Self(value))
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> Self {
        key.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hex hash identifying a submitted transaction on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(pub String);

impl TxHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unsigned transaction envelope (base64 XDR). Opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionEnvelope(pub String);

/// Envelope after the wallet attached its signature. Opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignedEnvelope(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildTransactionRequest {
    pub selection: CreditSelectionState,
    pub wallet_public_key: String,
    pub network: Network,
    pub idempotency_key: IdempotencyKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildTransactionResponse {
    pub transaction_xdr: TransactionEnvelope,
    pub network_passphrase: String,
}

// ─────────────────────────────────────────────────────────
// Payment state
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    #[default]
    Idle,
    Preparing,
    Signing,
    Submitting,
    Confirming,
    Success,
    Error,
}

impl TransactionStatus {
    /// An attempt is running and owns the state.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Self::Preparing | Self::Signing | Self::Submitting | Self::Confirming
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    /// No externally visible side effect can have happened yet.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Preparing | Self::Signing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::Signing => "signing",
            Self::Submitting => "submitting",
            Self::Confirming => "confirming",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classes of failure; decide how the UI may react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Connectivity,
    UserDeclined,
    TransientService,
    AmbiguousOutcome,
    Conflict,
    Hard,
}

/// Stable, classifiable reason recorded on a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentErrorReason {
    NotConnected,
    BuildFailed,
    IdempotencyConflict,
    NetworkMismatch,
    SigningRejected,
    SigningError,
    SubmissionTransient,
    SubmissionRejected,
    SubmissionOutcomeUnknown,
    ConfirmationFailed,
    ConfirmationTimeout,
    Cancelled,
    Interrupted,
    CheckpointFailed,
}

impl PaymentErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotConnected => "NotConnected",
            Self::BuildFailed => "BuildFailed",
            Self::IdempotencyConflict => "IdempotencyConflict",
            Self::NetworkMismatch => "NetworkMismatch",
            Self::SigningRejected => "SigningRejected",
            Self::SigningError => "SigningError",
            Self::SubmissionTransient => "SubmissionTransient",
            Self::SubmissionRejected => "SubmissionRejected",
            Self::SubmissionOutcomeUnknown => "SubmissionOutcomeUnknown",
            Self::ConfirmationFailed => "ConfirmationFailed",
            Self::ConfirmationTimeout => "ConfirmationTimeout",
            Self::Cancelled => "Cancelled",
            Self::Interrupted => "Interrupted",
            Self::CheckpointFailed => "CheckpointFailed",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotConnected => ErrorCategory::Connectivity,
            Self::SigningRejected | Self::Cancelled => ErrorCategory::UserDeclined,
            Self::BuildFailed
            | Self::SigningError
            | Self::SubmissionTransient
            | Self::Interrupted
            | Self::CheckpointFailed => ErrorCategory::TransientService,
            Self::SubmissionOutcomeUnknown | Self::ConfirmationTimeout => {
                ErrorCategory::AmbiguousOutcome
            }
            Self::IdempotencyConflict => ErrorCategory::Conflict,
            Self::NetworkMismatch | Self::SubmissionRejected | Self::ConfirmationFailed => {
                ErrorCategory::Hard
            }
        }
    }

    /// A user-triggered retry may continue the same attempt (same key, or the
    /// same hash when one was recorded).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotConnected
            | Self::BuildFailed
            | Self::SigningError
            | Self::SubmissionTransient
            | Self::SubmissionOutcomeUnknown
            | Self::ConfirmationTimeout
            | Self::Cancelled
            | Self::Interrupted
            | Self::CheckpointFailed => true,
            Self::IdempotencyConflict
            | Self::NetworkMismatch
            | Self::SigningRejected
            | Self::SubmissionRejected
            | Self::ConfirmationFailed => false,
        }
    }

    /// The transfer may or may not have happened on-chain.
    pub fn is_unknown_outcome(&self) -> bool {
        self.category() == ErrorCategory::AmbiguousOutcome
    }
}

impl fmt::Display for PaymentErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure recorded on [`PaymentState::error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailure {
    pub reason: PaymentErrorReason,
    pub detail: String,
}

impl PaymentFailure {
    pub fn new(reason: PaymentErrorReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for PaymentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.detail)
    }
}

/// The orchestrator's working memory for one purchase attempt.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentState {
    pub selection: CreditSelectionState,
    pub wallet: Option<WalletConnection>,
    pub status: TransactionStatus,
    pub transaction_hash: Option<TxHash>,
    pub error: Option<PaymentFailure>,
    pub idempotency_key: Option<IdempotencyKey>,
    /// User-triggered retries consumed by this attempt.
    #[serde(default)]
    pub retries: u32,
}
