//! Marketplace Access
//!
//! Rate-limited, retrying and cached access to the Wildberries, Ozon and
//! Yandex Market seller APIs. Callers get canonical stock and price records
//! regardless of which endpoint (async report or paginated listing) served
//! them.

pub mod cache;
pub mod config;
pub mod domain;
pub mod providers;

pub use config::Settings;
pub use domain::{MarketplaceId, PriceRecord, Query, RecordBatch, StockRecord, StoreCredential};
pub use providers::{AccessLayer, MarketplaceError, MarketplaceResult};
