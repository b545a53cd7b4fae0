//! Carbon credit checkout entry point.
//!
//! Loads the project catalog, wires the wallet bridges, build service and
//! Soroban RPC into a [`PaymentOrchestrator`], resumes any attempt left in the
//! checkpoint store, and exposes the checkout over a small Axum REST API.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use checkout::api::{self, AppState};
use checkout::bridge::BridgeWallet;
use checkout::builder::HttpTransactionBuilder;
use checkout::catalog::Catalog;
use checkout::checkpoint;
use checkout::config::Config;
use checkout::ledger::SorobanRpcLedger;
use checkout::orchestrator::PaymentOrchestrator;
use checkout::selector::CreditSelector;
use checkout::wallet::WalletConnector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG controls verbosity.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Optional .env file.
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    let pool = checkpoint::init_pool(&config.database_url).await?;
    let catalog = Arc::new(Catalog::from_path(&config.catalog_path)?);

    let client = Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()?;

    // ─── Wallets ──────────────────────────────────────────
    let mut connector =
        WalletConnector::new(config.network, config.supported_networks.clone());
    for (kind, url) in &config.wallet_bridges {
        info!("Registering {kind} wallet bridge at {url}");
        connector = connector.with_provider(Arc::new(BridgeWallet::new(
            *kind,
            client.clone(),
            url,
            &config.horizon_url,
        )));
    }
    if config.wallet_bridges.is_empty() {
        warn!("WALLET_BRIDGES is empty; no wallet can be connected");
    }
    let wallet = Arc::new(connector);

    // ─── Orchestrator ─────────────────────────────────────
    let orchestrator = Arc::new(
        PaymentOrchestrator::new(
            Arc::new(HttpTransactionBuilder::new(client.clone(), &config.builder_url)),
            wallet.clone(),
            Arc::new(SorobanRpcLedger::new(client, config.rpc_url.clone())),
            config.orchestrator(),
        )
        .with_checkpointer(Arc::new(pool.clone())),
    );
    orchestrator
        .on_transition(|state| info!("Payment is now {}", state.status))
        .await;

    if let Some(saved) = checkpoint::load_checkpoint(&pool).await? {
        info!("Found checkpoint in status {}", saved.status);
        let attempt = orchestrator.begin_resume(saved).await?;
        let runner = orchestrator.clone();
        tokio::spawn(async move {
            let state = runner.run(attempt).await;
            info!("Resumed attempt settled as {}", state.status);
        });
    }

    // ─── REST API ─────────────────────────────────────────
    let state = Arc::new(AppState {
        selector: Mutex::new(CreditSelector::new(catalog.clone())),
        catalog,
        wallet,
        orchestrator,
        payment_asset: config.payment_asset.clone(),
        recipient_address: config.recipient_address.clone(),
    });

    let app = api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
