//! Credit selection: validates the chosen project/quantity and quotes a price.

use std::sync::Arc;

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use crate::catalog::Catalog;
use crate::types::{round2, CreditSelectionState, TransactionPreview};

/// Why a `select` call was refused. Every variant is an `InvalidSelection`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("invalid selection: unknown project '{0}'")]
    UnknownProject(String),
    #[error("invalid selection: project '{0}' is out of stock")]
    OutOfStock(String),
    #[error("invalid selection: quantity must be positive, got {0}")]
    NonPositiveQuantity(Decimal),
    #[error("invalid selection: requested {requested} t exceeds available {available} t")]
    ExceedsSupply {
        requested: Decimal,
        available: Decimal,
    },
}

type Listener = Box<dyn Fn(&CreditSelectionState) + Send + Sync>;

/// Owns the user's [`CreditSelectionState`] until a purchase begins.
pub struct CreditSelector {
    catalog: Arc<Catalog>,
    state: CreditSelectionState,
    listeners: Vec<Listener>,
}

impl CreditSelector {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            state: CreditSelectionState::default(),
            listeners: Vec::new(),
        }
    }

    /// Register a callback invoked with every accepted selection.
    pub fn on_change<F>(&mut self, listener: F)
    where
        F: Fn(&CreditSelectionState) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    pub fn state(&self) -> &CreditSelectionState {
        &self.state
    }

    /// Validate and apply a new selection.
    ///
    /// On error the previous state is left untouched and no listener fires.
    pub fn select(
        &mut self,
        project_id: &str,
        quantity: Decimal,
    ) -> Result<&CreditSelectionState, SelectionError> {
        let project = self
            .catalog
            .get(project_id)
            .ok_or_else(|| SelectionError::UnknownProject(project_id.to_string()))?;

        if !project.is_purchasable() {
            return Err(SelectionError::OutOfStock(project.id.clone()));
        }
        if quantity <= Decimal::ZERO {
            return Err(SelectionError::NonPositiveQuantity(quantity));
        }
        if quantity > project.available_supply {
            return Err(SelectionError::ExceedsSupply {
                requested: quantity,
                available: project.available_supply,
            });
        }

        self.state = CreditSelectionState {
            project_id: Some(project.id.clone()),
            quantity,
            calculated_price: round2(quantity * project.price_per_ton),
        };
        debug!(
            "Selected {} t of {} for {}",
            quantity, project.id, self.state.calculated_price
        );
        self.notify();
        Ok(&self.state)
    }

    /// Drop the current selection.
    pub fn clear(&mut self) {
        self.state = CreditSelectionState::default();
        self.notify();
    }

    /// Summary of what the user is about to pay for, if anything is selected.
    pub fn preview(&self, payment_asset: &str, recipient: &str) -> Option<TransactionPreview> {
        let project = self.catalog.get(self.state.project_id.as_deref()?)?;
        Some(TransactionPreview {
            project_name: project.name.clone(),
            quantity: self.state.quantity,
            price_per_ton: project.price_per_ton,
            total_amount: round2(self.state.quantity * project.price_per_ton),
            payment_asset: payment_asset.to_string(),
            recipient_address: recipient.to_string(),
        })
    }

    fn notify(&self) {
        for listener in &self.listeners {
            listener(&self.state);
        }
    }
}
