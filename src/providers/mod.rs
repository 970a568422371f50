//! Marketplace Access Module
//!
//! This module provides a uniform interface over the Wildberries, Ozon and
//! Yandex Market seller APIs.
//!
//! # Architecture
//!
//! ```text
//!                  ┌────────────────────────┐
//!                  │  AccessLayer (facade)  │──── RecordCache
//!                  └───────────┬────────────┘
//!                              │ MarketplaceClient
//!          ┌───────────────────┼───────────────────┐
//!     ┌────┴────┐         ┌────┴───┐         ┌─────┴──────┐
//!     │   WB    │         │  Ozon  │         │ Yandex Mkt │
//!     └────┬────┘         └────┬───┘         └─────┬──────┘
//!          └──── Paginator / ReportDriver / Normalizer ─┘
//!                              │
//!                  ┌───────────┴────────────┐
//!                  │ ResilientTransport     │──── RateGovernor
//!                  └───────────┬────────────┘
//!                              │ HttpBackend
//!                          reqwest
//! ```

pub mod traits;
pub mod rate_governor;
pub mod http_client;
pub mod paginator;
pub mod report;
pub mod normalizer;
pub mod facade;
pub mod wildberries;
pub mod ozon;
pub mod yandex;

// Re-export commonly used types
pub use traits::{
    ClientFactory,
    Fetched,
    MarketplaceClient,
    MarketplaceError,
    MarketplaceResult,
    SourceFailure,
};
pub use facade::{AccessLayer, ClientContext, FleetResult};
pub use http_client::{ApiRequest, ApiResponse, HttpBackend, ReqwestBackend, ResilientTransport};
pub use paginator::{Cursor, Paginator};
pub use rate_governor::{EndpointClass, RateGovernor};
pub use report::{ReportDriver, ReportStatus};
