//! HTTP wallet bridge.
//!
//! Each wallet kind is reached through a bridge service that relays to the
//! vendor (a browser extension session, or a custody signer). The bridge
//! exposes:
//!
//! * `POST /connect {network}` → `{publicKey}`
//! * `POST /network {network}`
//! * `POST /sign {transactionXdr, networkPassphrase}` → `{signedTransactionXdr}`
//! * `POST /disconnect`
//!
//! `403` means the user declined. Balances come from Horizon, not the bridge.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::types::{
    Network, SignedEnvelope, TransactionEnvelope, WalletBalance, WalletKind,
};
use crate::wallet::{WalletError, WalletProvider};

pub struct BridgeWallet {
    kind: WalletKind,
    client: Client,
    bridge_url: String,
    horizon_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectResponse {
    public_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignResponse {
    signed_transaction_xdr: String,
}

#[derive(Debug, Deserialize)]
struct HorizonAccount {
    balances: Vec<HorizonBalance>,
}

#[derive(Debug, Deserialize)]
struct HorizonBalance {
    balance: String,
    asset_type: String,
    asset_code: Option<String>,
}

impl BridgeWallet {
    pub fn new(kind: WalletKind, client: Client, bridge_url: &str, horizon_url: &str) -> Self {
        Self {
            kind,
            client,
            bridge_url: bridge_url.trim_end_matches('/').to_string(),
            horizon_url: horizon_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, reqwest::Error> {
        self.client
            .post(format!("{}{}", self.bridge_url, path))
            .json(&body)
            .send()
            .await
    }
}

#[async_trait]
impl WalletProvider for BridgeWallet {
    fn kind(&self) -> WalletKind {
        self.kind
    }

    async fn request_access(&self, network: Network) -> Result<String, WalletError> {
        let resp = self
            .post("/connect", json!({ "network": network }))
            .await
            .map_err(|e| WalletError::WalletUnavailable(e.to_string()))?;

        match resp.status() {
            s if s.is_success() => resp
                .json::<ConnectResponse>()
                .await
                .map(|r| r.public_key)
                .map_err(|e| WalletError::WalletUnavailable(e.to_string())),
            StatusCode::FORBIDDEN => Err(WalletError::UserRejected),
            s => Err(WalletError::WalletUnavailable(format!("bridge answered {s}"))),
        }
    }

    async fn switch_network(&self, network: Network) -> Result<(), WalletError> {
        let resp = self
            .post("/network", json!({ "network": network }))
            .await
            .map_err(|e| WalletError::NetworkSwitchFailed(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(WalletError::NetworkSwitchFailed(format!(
                "bridge answered {}",
                resp.status()
            )))
        }
    }

    async fn balances(
        &self,
        public_key: &str,
        network: Network,
    ) -> Result<WalletBalance, WalletError> {
        let url = format!("{}/accounts/{}", self.horizon_url, public_key);
        debug!("Fetching {network} balances from {url}");

        let account: HorizonAccount = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| WalletError::BalanceFetchFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| WalletError::BalanceFetchFailed(e.to_string()))?;

        Ok(balances_from_horizon(&account.balances))
    }

    async fn sign(
        &self,
        envelope: &TransactionEnvelope,
        network_passphrase: &str,
    ) -> Result<SignedEnvelope, WalletError> {
        let resp = self
            .post(
                "/sign",
                json!({
                    "transactionXdr": envelope.0,
                    "networkPassphrase": network_passphrase,
                }),
            )
            .await
            .map_err(|e| WalletError::SigningError(e.to_string()))?;

        match resp.status() {
            s if s.is_success() => resp
                .json::<SignResponse>()
                .await
                .map(|r| SignedEnvelope(r.signed_transaction_xdr))
                .map_err(|e| WalletError::SigningError(e.to_string())),
            StatusCode::FORBIDDEN => Err(WalletError::SigningRejected),
            s => Err(WalletError::SigningError(format!("bridge answered {s}"))),
        }
    }

    async fn release(&self) {
        if let Err(e) = self.post("/disconnect", json!({})).await {
            warn!("{} bridge did not acknowledge disconnect: {e}", self.kind);
        }
    }
}

fn balances_from_horizon(balances: &[HorizonBalance]) -> WalletBalance {
    let mut out = WalletBalance::default();
    for b in balances {
        let Ok(amount) = b.balance.parse::<Decimal>() else {
            continue;
        };
        match (b.asset_type.as_str(), b.asset_code.as_deref()) {
            ("native", _) => out.xlm = amount,
            (_, Some("USDC")) => out.usdc = amount,
            _ => {}
        }
    }
    out
}
