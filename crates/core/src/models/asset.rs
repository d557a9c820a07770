use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The category of a held asset. Allocation is grouped by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Stock,
    Bond,
    Etf,
    Crypto,
    Other,
}

impl std::fmt::Display for AssetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetType::Stock => write!(f, "stock"),
            AssetType::Bond => write!(f, "bond"),
            AssetType::Etf => write!(f, "etf"),
            AssetType::Crypto => write!(f, "crypto"),
            AssetType::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for AssetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stock" => Ok(AssetType::Stock),
            "bond" => Ok(AssetType::Bond),
            "etf" => Ok(AssetType::Etf),
            "crypto" => Ok(AssetType::Crypto),
            "other" => Ok(AssetType::Other),
            other => Err(format!("unknown asset type '{other}'")),
        }
    }
}

/// A position held inside a portfolio.
///
/// Current value is never stored; it is derived from the latest close of the
/// symbol's price series at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// Ticker symbol, uppercased (e.g., "AAPL", "BND", "VTI")
    pub symbol: String,

    /// Human-readable name (e.g., "Apple Inc.")
    pub name: String,

    /// Units held
    pub quantity: f64,

    /// Price paid per unit
    pub purchase_price: f64,

    pub purchase_date: NaiveDate,

    pub asset_type: AssetType,
}

impl Asset {
    pub fn new(
        symbol: impl Into<String>,
        name: impl Into<String>,
        quantity: f64,
        purchase_price: f64,
        purchase_date: NaiveDate,
        asset_type: AssetType,
    ) -> Self {
        Self {
            symbol: symbol.into().trim().to_uppercase(),
            name: name.into(),
            quantity,
            purchase_price,
            purchase_date,
            asset_type,
        }
    }

    /// Amount paid for the whole position.
    pub fn cost_basis(&self) -> f64 {
        self.quantity * self.purchase_price
    }
}
