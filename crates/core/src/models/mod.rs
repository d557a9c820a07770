pub mod analytics;
pub mod asset;
pub mod portfolio;
pub mod price;
pub mod settings;
