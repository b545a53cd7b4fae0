//! Carbon credit checkout.
//!
//! Lets a user pick a quantity of tokenized carbon credits from a project,
//! binds a user-controlled Stellar wallet, and drives the purchase through
//! build, sign, submit and confirm with a persisted idempotency key so retries
//! and restarts never pay twice.
//!
//! * [`selector`] validates the selection and quotes the price.
//! * [`wallet`] owns the wallet binding; [`bridge`] reaches real vendors.
//! * [`builder`] and [`ledger`] are the build service and Soroban RPC clients.
//! * [`orchestrator`] is the payment state machine.
//! * [`checkpoint`] persists its state; [`api`] serves it over HTTP.

pub mod api;
pub mod bridge;
pub mod builder;
pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod ledger;
pub mod orchestrator;
pub mod selector;
pub mod types;
pub mod wallet;

#[cfg(test)]
mod invariants;
#[cfg(test)]
mod test_idempotency;
#[cfg(test)]
mod test_support;

pub use errors::{CheckoutError, Result};
pub use orchestrator::{OrchestratorConfig, OrchestratorError, PaymentOrchestrator};
pub use types::{PaymentState, TransactionStatus};
