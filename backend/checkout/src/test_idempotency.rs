use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::builder::BuildError;
use crate::invariants::assert_history_valid;
use crate::orchestrator::{OrchestratorConfig, PaymentOrchestrator};
use crate::test_support::{MockBuilder, MockLedger, MockWallet};
use crate::types::{
    CreditSelectionState, IdempotencyKey, Network, PaymentState, TransactionStatus, WalletKind,
};
use crate::wallet::WalletConnector;

async fn setup() -> (Arc<PaymentOrchestrator>, Arc<MockBuilder>) {
    let connector = Arc::new(
        WalletConnector::new(Network::Testnet, HashSet::from([Network::Testnet]))
            .with_provider(Arc::new(MockWallet::new(WalletKind::Albedo, "GUSER"))),
    );
    connector.connect(WalletKind::Albedo).await.unwrap();
    let builder = Arc::new(MockBuilder::new());
    let orchestrator = Arc::new(PaymentOrchestrator::new(
        builder.clone(),
        connector,
        Arc::new(MockLedger::new()),
        OrchestratorConfig {
            confirmation_poll_interval: Duration::from_millis(1),
            max_retries: 5,
            ..OrchestratorConfig::default()
        },
    ));
    (orchestrator, builder)
}

fn selection(quantity: i64) -> CreditSelectionState {
    CreditSelectionState {
        project_id: Some("proj-001".to_string()),
        quantity: Decimal::new(quantity, 0),
        calculated_price: Decimal::new(1550 * quantity, 2),
    }
}

/// Independent attempts never share a key, even for the same selection;
/// every retry inside one attempt reuses the key stamped at `idle → preparing`.
#[tokio::test]
async fn keys_are_per_attempt_and_stable_across_retries() {
    let (orchestrator, builder) = setup().await;
    let history = Arc::new(std::sync::Mutex::new(Vec::<PaymentState>::new()));
    let sink = history.clone();
    orchestrator
        .on_transition(move |s| sink.lock().unwrap().push(s.clone()))
        .await;

    let mut attempt_keys = HashSet::new();
    for round in 0..40u32 {
        let failures = round % 4;
        for _ in 0..failures {
            builder.fail_next(BuildError::BuildFailed("busy".to_string()));
        }
        let calls_before = builder.call_count();

        let mut state = orchestrator
            .start_purchase(selection(1 + i64::from(round % 2)))
            .await
            .unwrap();
        let key: IdempotencyKey = state.idempotency_key.clone().unwrap();
        while state.status == TransactionStatus::Error {
            state = orchestrator.retry().await.unwrap();
            assert_eq!(state.idempotency_key.as_ref(), Some(&key));
        }
        assert_eq!(state.status, TransactionStatus::Success);
        assert_eq!(state.retries, failures);

        let keys = builder.keys();
        assert_eq!(keys.len() - calls_before, failures as usize + 1);
        assert!(keys[calls_before..].iter().all(|k| *k == key));

        assert!(attempt_keys.insert(key), "key reused across attempts");
        orchestrator.reset().await.unwrap();
    }

    assert_eq!(attempt_keys.len(), 40);
    assert_history_valid(&history.lock().unwrap());
}
