//! Project catalog loaded from a JSON file.

use std::path::Path;

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::errors::{CheckoutError, Result};
use crate::types::CarbonProject;

/// The purchasable projects, validated on load.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    projects: Vec<CarbonProject>,
}

impl Catalog {
    /// Build a catalog, normalising out-of-stock flags and rejecting
    /// negative prices, negative supplies and duplicate ids.
    pub fn new(projects: Vec<CarbonProject>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        let mut normalised = Vec::with_capacity(projects.len());

        for mut project in projects {
            if !seen.insert(project.id.clone()) {
                return Err(CheckoutError::Catalog(format!(
                    "duplicate project id '{}'",
                    project.id
                )));
            }
            if project.price_per_ton < Decimal::ZERO {
                return Err(CheckoutError::Catalog(format!(
                    "project '{}' has a negative price per ton",
                    project.id
                )));
            }
            if project.available_supply < Decimal::ZERO {
                return Err(CheckoutError::Catalog(format!(
                    "project '{}' has a negative available supply",
                    project.id
                )));
            }
            if project.available_supply.is_zero() && !project.is_out_of_stock {
                warn!(
                    "Project {} has no supply left; marking it out of stock",
                    project.id
                );
                project.is_out_of_stock = true;
            }
            normalised.push(project);
        }

        Ok(Self {
            projects: normalised,
        })
    }

    /// Load a JSON array of projects from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let projects: Vec<CarbonProject> = serde_json::from_str(&raw)?;
        let catalog = Self::new(projects)?;
        info!(
            "Loaded {} projects from {}",
            catalog.projects.len(),
            path.display()
        );
        Ok(catalog)
    }

    pub fn get(&self, id: &str) -> Option<&CarbonProject> {
        self.projects.iter().find(|p| p.id == id)
    }

    pub fn projects(&self) -> &[CarbonProject] {
        &self.projects
    }
}
