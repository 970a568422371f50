//! Domain types and models

pub mod records;
mod store;

pub use records::{
    MarketplaceId, Money, StockRecord, PriceRecord,
    SourceKind, Provenance, RecordBatch,
};
pub use store::{StoreCredential, Query};
