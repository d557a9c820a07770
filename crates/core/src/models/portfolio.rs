use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use super::asset::Asset;

/// A named collection of assets.
///
/// Total value and allocation are never stored here; they are recomputed on
/// every read from the holdings and the freshest price data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: Uuid,

    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Holdings in insertion order, at most one entry per symbol
    #[serde(default)]
    pub assets: Vec<Asset>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Portfolio {
    pub fn new(name: impl Into<String>, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description,
            assets: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Find a holding by symbol (case-insensitive).
    pub fn asset(&self, symbol: &str) -> Option<&Asset> {
        let upper = symbol.trim().to_uppercase();
        self.assets.iter().find(|a| a.symbol == upper)
    }

    /// Distinct symbols in holding order.
    pub fn symbols(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.assets
            .iter()
            .map(|a| a.symbol.as_str())
            .filter(|symbol| seen.insert(*symbol))
            .collect()
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
