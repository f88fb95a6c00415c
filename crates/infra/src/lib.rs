//! Infrastructure layer: record stores, command dispatch, ledger services,
//! payment provider and notifier adapters, payouts and read models.

pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod jobs;
pub mod ledger;
pub mod notifier;
pub mod payouts;
pub mod projections;
pub mod provider;
pub mod services;
pub mod store;
pub mod workers;

pub use config::{ConfigError, MarketConfig};
pub use errors::{ServiceError, ServiceResult};
pub use ledger::{Ledger, Stores};
