pub mod billing;
pub mod catalog;
pub mod config;
pub mod error;
pub mod memory;
pub mod routes;
pub mod webhooks;

pub use config::BillingSettings;
