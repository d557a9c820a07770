use std::collections::HashSet;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::asset::Asset;
use crate::models::portfolio::Portfolio;

/// Maximum length of a portfolio name, in characters.
pub const MAX_NAME_LEN: usize = 100;

/// Name of the portfolio built by [`PortfolioService::combine`].
pub const COMBINED_NAME: &str = "All portfolios";

/// In-memory portfolio and holding bookkeeping.
///
/// Pure business logic: no I/O, no API calls.
pub struct PortfolioService;

impl PortfolioService {
    pub fn new() -> Self {
        Self
    }

    /// Create a portfolio and append it to `portfolios`. Returns its ID.
    pub fn create(
        &self,
        portfolios: &mut Vec<Portfolio>,
        name: &str,
        description: Option<String>,
    ) -> Result<Uuid, CoreError> {
        let name = Self::validate_name(name)?;
        let portfolio = Portfolio::new(name, Self::normalize_description(description));
        let id = portfolio.id;
        portfolios.push(portfolio);
        Ok(id)
    }

    pub fn find<'a>(&self, portfolios: &'a [Portfolio], id: Uuid) -> Result<&'a Portfolio, CoreError> {
        portfolios
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| CoreError::PortfolioNotFound(id.to_string()))
    }

    pub fn find_mut<'a>(
        &self,
        portfolios: &'a mut [Portfolio],
        id: Uuid,
    ) -> Result<&'a mut Portfolio, CoreError> {
        portfolios
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| CoreError::PortfolioNotFound(id.to_string()))
    }

    /// Rename and/or re-describe a portfolio. Bumps `updated_at`.
    pub fn update(
        &self,
        portfolio: &mut Portfolio,
        name: &str,
        description: Option<String>,
    ) -> Result<(), CoreError> {
        portfolio.name = Self::validate_name(name)?;
        portfolio.description = Self::normalize_description(description);
        portfolio.touch();
        Ok(())
    }

    /// Remove a portfolio and return it.
    pub fn delete(&self, portfolios: &mut Vec<Portfolio>, id: Uuid) -> Result<Portfolio, CoreError> {
        let idx = portfolios
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| CoreError::PortfolioNotFound(id.to_string()))?;
        Ok(portfolios.remove(idx))
    }

    /// Add a holding. A symbol that is already held is merged into the
    /// existing line: quantities add up and the purchase price becomes the
    /// quantity-weighted average.
    pub fn add_asset(&self, portfolio: &mut Portfolio, asset: Asset) -> Result<(), CoreError> {
        let asset = Self::validate_asset(asset)?;

        match portfolio.assets.iter_mut().find(|a| a.symbol == asset.symbol) {
            Some(existing) => {
                let quantity = existing.quantity + asset.quantity;
                existing.purchase_price = (existing.cost_basis() + asset.cost_basis()) / quantity;
                existing.quantity = quantity;
                existing.purchase_date = existing.purchase_date.min(asset.purchase_date);
            }
            None => portfolio.assets.push(asset),
        }

        portfolio.touch();
        Ok(())
    }

    /// Remove a holding by symbol (case-insensitive) and return it.
    pub fn remove_asset(&self, portfolio: &mut Portfolio, symbol: &str) -> Result<Asset, CoreError> {
        let upper = symbol.trim().to_uppercase();
        let idx = portfolio
            .assets
            .iter()
            .position(|a| a.symbol == upper)
            .ok_or_else(|| CoreError::AssetNotFound {
                portfolio: portfolio.id.to_string(),
                symbol: upper.clone(),
            })?;

        let removed = portfolio.assets.remove(idx);
        portfolio.touch();
        Ok(removed)
    }

    /// Re-validate an imported portfolio: name rules, every holding, and
    /// duplicate symbols merged the same way [`add_asset`](Self::add_asset) does.
    pub fn normalize_imported(&self, mut portfolio: Portfolio) -> Result<Portfolio, CoreError> {
        portfolio.name = Self::validate_name(&portfolio.name)?;
        portfolio.description = Self::normalize_description(portfolio.description.take());

        let updated_at = portfolio.updated_at;
        let assets = std::mem::take(&mut portfolio.assets);
        for asset in assets {
            self.add_asset(&mut portfolio, asset)?;
        }
        portfolio.updated_at = updated_at;

        Ok(portfolio)
    }

    /// Import portfolios all-or-nothing. Portfolios whose ID already exists
    /// replace the existing one; the rest are appended. Returns how many were
    /// imported.
    pub fn import(
        &self,
        portfolios: &mut Vec<Portfolio>,
        imported: Vec<Portfolio>,
    ) -> Result<usize, CoreError> {
        // Phase 1: validate everything before touching the real list
        let mut seen = HashSet::new();
        let mut validated = Vec::with_capacity(imported.len());
        for portfolio in imported {
            if !seen.insert(portfolio.id) {
                return Err(CoreError::ValidationError(format!(
                    "Duplicate portfolio id {} in import",
                    portfolio.id
                )));
            }
            validated.push(self.normalize_imported(portfolio)?);
        }

        // Phase 2: all valid, apply
        let count = validated.len();
        for portfolio in validated {
            match portfolios.iter_mut().find(|p| p.id == portfolio.id) {
                Some(existing) => *existing = portfolio,
                None => portfolios.push(portfolio),
            }
        }
        Ok(count)
    }

    /// Merge every holding of every portfolio into one portfolio, one line per
    /// symbol (merged the way [`add_asset`](Self::add_asset) merges). The
    /// result carries the nil UUID since it is never stored.
    pub fn combine(&self, portfolios: &[Portfolio]) -> Result<Portfolio, CoreError> {
        let mut combined = Portfolio::new(COMBINED_NAME, None);
        combined.id = Uuid::nil();
        for asset in portfolios.iter().flat_map(|p| p.assets.iter()) {
            self.add_asset(&mut combined, asset.clone())?;
        }
        Ok(combined)
    }

    /// Rules:
    /// - Trimmed name must not be empty
    /// - At most [`MAX_NAME_LEN`] characters
    fn validate_name(name: &str) -> Result<String, CoreError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(CoreError::ValidationError(
                "Portfolio name must not be empty".into(),
            ));
        }
        if trimmed.chars().count() > MAX_NAME_LEN {
            return Err(CoreError::ValidationError(format!(
                "Portfolio name must be at most {MAX_NAME_LEN} characters"
            )));
        }
        Ok(trimmed.to_string())
    }

    fn normalize_description(description: Option<String>) -> Option<String> {
        description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
    }

    /// Rules:
    /// - Symbol non-empty (stored uppercased)
    /// - Quantity must be positive and finite
    /// - Purchase price must be non-negative and finite
    fn validate_asset(mut asset: Asset) -> Result<Asset, CoreError> {
        asset.symbol = asset.symbol.trim().to_uppercase();
        if asset.symbol.is_empty() {
            return Err(CoreError::ValidationError("Asset symbol must not be empty".into()));
        }
        if !asset.quantity.is_finite() || asset.quantity <= 0.0 {
            return Err(CoreError::ValidationError(format!(
                "Quantity of {} must be positive, got {}",
                asset.symbol, asset.quantity
            )));
        }
        if !asset.purchase_price.is_finite() || asset.purchase_price < 0.0 {
            return Err(CoreError::ValidationError(format!(
                "Purchase price of {} must be non-negative, got {}",
                asset.symbol, asset.purchase_price
            )));
        }
        asset.name = asset.name.trim().to_string();
        if asset.name.is_empty() {
            asset.name = asset.symbol.clone();
        }
        Ok(asset)
    }
}

impl Default for PortfolioService {
    fn default() -> Self {
        Self::new()
    }
}
