//! Wallet connection lifecycle.
//!
//! Every wallet vendor is one implementation of [`WalletProvider`]. The
//! [`WalletConnector`] keeps a provider per [`WalletKind`] and binds to one of
//! them on `connect`; everything else talks to the connector only.
//!
//! Operations on the connector are serialized: a `sign` never overlaps a
//! `connect` or `disconnect`. The current [`WalletConnection`] is published
//! through a `watch` channel so readers never wait behind a pending signature.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use crate::types::{
    Network, SignedEnvelope, TransactionEnvelope, WalletBalance, WalletConnection, WalletKind,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    #[error("wallet unavailable: {0}")]
    WalletUnavailable(String),
    #[error("user rejected the connection request")]
    UserRejected,
    #[error("wallet is not connected")]
    NotConnected,
    #[error("network switch failed: {0}")]
    NetworkSwitchFailed(String),
    #[error("balance fetch failed: {0}")]
    BalanceFetchFailed(String),
    #[error("user rejected the signature request")]
    SigningRejected,
    #[error("wallet failed to sign: {0}")]
    SigningError(String),
}

/// A user-controlled signing capability from one wallet vendor.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    fn kind(&self) -> WalletKind;

    /// Ask the user for access; returns the account public key.
    async fn request_access(&self, network: Network) -> Result<String, WalletError>;

    /// Ask the wallet to move to `network`.
    async fn switch_network(&self, network: Network) -> Result<(), WalletError>;

    async fn balances(
        &self,
        public_key: &str,
        network: Network,
    ) -> Result<WalletBalance, WalletError>;

    async fn sign(
        &self,
        envelope: &TransactionEnvelope,
        network_passphrase: &str,
    ) -> Result<SignedEnvelope, WalletError>;

    /// Release any vendor-side session. Best effort.
    async fn release(&self) {}
}

/// Owns the live [`WalletConnection`].
pub struct WalletConnector {
    providers: HashMap<WalletKind, Arc<dyn WalletProvider>>,
    supported_networks: HashSet<Network>,
    default_network: Network,
    active: Mutex<Option<Arc<dyn WalletProvider>>>,
    connection: watch::Sender<Option<WalletConnection>>,
}

impl WalletConnector {
    pub fn new(default_network: Network, supported_networks: HashSet<Network>) -> Self {
        let (connection, _) = watch::channel(None);
        Self {
            providers: HashMap::new(),
            supported_networks,
            default_network,
            active: Mutex::new(None),
            connection,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn WalletProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    /// Current connection, if any. Never waits on an in-flight operation.
    pub fn snapshot(&self) -> Option<WalletConnection> {
        self.connection.borrow().clone()
    }

    /// Subscribe to connection changes.
    pub fn watch(&self) -> watch::Receiver<Option<WalletConnection>> {
        self.connection.subscribe()
    }

    /// Bind to the provider registered for `kind`, replacing any prior binding.
    pub async fn connect(&self, kind: WalletKind) -> Result<WalletConnection, WalletError> {
        let provider = self
            .providers
            .get(&kind)
            .cloned()
            .ok_or_else(|| WalletError::WalletUnavailable(format!("no {kind} wallet configured")))?;

        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.release().await;
            self.connection.send_replace(None);
        }

        let network = self.default_network;
        let public_key = provider.request_access(network).await?;
        if public_key.trim().is_empty() {
            return Err(WalletError::WalletUnavailable(
                "wallet returned an empty public key".to_string(),
            ));
        }

        let balance = match provider.balances(&public_key, network).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!("Connected {kind} wallet {public_key} but could not read balances: {e}");
                WalletBalance::default()
            }
        };

        let connection = WalletConnection::connected(kind, public_key, network, balance);
        info!(
            "Wallet connected: {} {} on {}",
            kind, connection.public_key, network
        );
        *active = Some(provider);
        self.connection.send_replace(Some(connection.clone()));
        Ok(connection)
    }

    /// Drop the binding. Calling it while disconnected does nothing.
    pub async fn disconnect(&self) {
        let mut active = self.active.lock().await;
        if let Some(provider) = active.take() {
            provider.release().await;
            info!("Wallet disconnected");
        }
        self.connection.send_replace(None);
    }

    pub async fn switch_network(&self, target: Network) -> Result<WalletConnection, WalletError> {
        let active = self.active.lock().await;
        let provider = active.as_ref().ok_or(WalletError::NotConnected)?;
        let current = self.snapshot().ok_or(WalletError::NotConnected)?;

        if !self.supported_networks.contains(&target) {
            return Err(WalletError::NetworkSwitchFailed(format!(
                "{target} is not supported"
            )));
        }
        if current.network == target {
            return Ok(current);
        }

        provider.switch_network(target).await.map_err(|e| match e {
            WalletError::NetworkSwitchFailed(_) => e,
            other => WalletError::NetworkSwitchFailed(other.to_string()),
        })?;

        let balance = provider
            .balances(&current.public_key, target)
            .await
            .unwrap_or_else(|e| {
                warn!("Balances unavailable after switching to {target}: {e}");
                WalletBalance::default()
            });

        let updated = WalletConnection {
            network: target,
            balance,
            ..current
        };
        info!("Wallet switched to {target}");
        self.connection.send_replace(Some(updated.clone()));
        Ok(updated)
    }

    /// Re-read balances. On failure the previous balance stays in place.
    pub async fn refresh_balance(&self) -> Result<WalletBalance, WalletError> {
        let active = self.active.lock().await;
        let provider = active.as_ref().ok_or(WalletError::NotConnected)?;
        let current = self.snapshot().ok_or(WalletError::NotConnected)?;

        let balance = provider
            .balances(&current.public_key, current.network)
            .await
            .map_err(|e| match e {
                WalletError::BalanceFetchFailed(_) => e,
                other => WalletError::BalanceFetchFailed(other.to_string()),
            })?;

        self.connection.send_modify(|conn| {
            if let Some(conn) = conn.as_mut() {
                conn.balance = balance.clone();
            }
        });
        Ok(balance)
    }

    pub async fn sign(
        &self,
        envelope: &TransactionEnvelope,
        network_passphrase: &str,
    ) -> Result<SignedEnvelope, WalletError> {
        let active = self.active.lock().await;
        let provider = active.as_ref().ok_or(WalletError::NotConnected)?;
        provider.sign(envelope, network_passphrase).await
    }
}
