pub mod aggregator;
pub mod portfolio_service;
pub mod quote_cache;
pub mod risk_engine;
