//! Canonical Record Models
//!
//! Marketplace-agnostic shapes for stock and price entries. Every adapter
//! normalizes its payloads into these types before handing them to a sink.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Marketplace
// ============================================================================

/// Supported marketplaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketplaceId {
    Wildberries,
    Ozon,
    YandexMarket,
}

impl MarketplaceId {
    pub const ALL: [MarketplaceId; 3] = [
        MarketplaceId::Wildberries,
        MarketplaceId::Ozon,
        MarketplaceId::YandexMarket,
    ];

    /// Stable code used in config keys, cache keys and logs
    pub fn code(&self) -> &'static str {
        match self {
            MarketplaceId::Wildberries => "wildberries",
            MarketplaceId::Ozon => "ozon",
            MarketplaceId::YandexMarket => "yandex_market",
        }
    }

    /// Parse a marketplace code (accepts a few common short forms)
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_lowercase().as_str() {
            "wildberries" | "wb" => Some(MarketplaceId::Wildberries),
            "ozon" => Some(MarketplaceId::Ozon),
            "yandex_market" | "yandex" | "ym" => Some(MarketplaceId::YandexMarket),
            _ => None,
        }
    }
}

impl std::fmt::Display for MarketplaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ============================================================================
// Money
// ============================================================================

/// Monetary amount in minor units (kopecks)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(pub i64);

impl Money {
    pub fn from_minor(minor: i64) -> Self {
        Money(minor)
    }

    /// Convert a major-unit amount (e.g. `1299.50`) rounding to the nearest minor unit
    pub fn from_major(major: f64) -> Self {
        Money((major * 100.0).round() as i64)
    }

    pub fn minor(&self) -> i64 {
        self.0
    }

    pub fn as_major(&self) -> f64 {
        self.0 as f64 / 100.0
    }
}

// ============================================================================
// Records
// ============================================================================

/// Canonical stock entry: one item on one warehouse.
///
/// Optional fields stay `None` when the upstream payload does not carry
/// them; quantities are never defaulted to zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockRecord {
    pub marketplace: MarketplaceId,
    pub store_id: String,
    /// Seller-assigned article
    pub sku: Option<String>,
    /// Marketplace-internal item id (nmId, product_id, ...)
    pub item_id: Option<String>,
    pub barcode: Option<String>,
    pub warehouse_id: Option<String>,
    pub warehouse_name: Option<String>,
    pub quantity: Option<u64>,
    pub reserved: Option<u64>,
    pub in_way_to_client: Option<u64>,
    pub in_way_from_client: Option<u64>,
    pub price: Option<Money>,
    pub discount_percent: Option<f64>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub size: Option<String>,
    pub last_change: Option<DateTime<Utc>>,
}

impl StockRecord {
    /// Empty record bound to a marketplace and store
    pub fn new(marketplace: MarketplaceId, store_id: &str) -> Self {
        StockRecord {
            marketplace,
            store_id: store_id.to_string(),
            sku: None,
            item_id: None,
            barcode: None,
            warehouse_id: None,
            warehouse_name: None,
            quantity: None,
            reserved: None,
            in_way_to_client: None,
            in_way_from_client: None,
            price: None,
            discount_percent: None,
            category: None,
            brand: None,
            size: None,
            last_change: None,
        }
    }
}

/// Canonical price entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub marketplace: MarketplaceId,
    pub store_id: String,
    pub sku: Option<String>,
    pub item_id: Option<String>,
    pub price: Option<Money>,
    pub old_price: Option<Money>,
    pub discount_percent: Option<f64>,
    pub currency: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl PriceRecord {
    pub fn new(marketplace: MarketplaceId, store_id: &str) -> Self {
        PriceRecord {
            marketplace,
            store_id: store_id.to_string(),
            sku: None,
            item_id: None,
            price: None,
            old_price: None,
            discount_percent: None,
            currency: None,
            timestamp: None,
        }
    }
}

// ============================================================================
// Provenance
// ============================================================================

/// Which endpoint family produced a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Submit/poll/download report workflow
    Report,
    /// Synchronous paginated endpoint
    Paginated,
    /// Per-warehouse stock of the seller's own warehouses (FBS)
    SellerWarehouses,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Report => write!(f, "report"),
            SourceKind::Paginated => write!(f, "paginated"),
            SourceKind::SellerWarehouses => write!(f, "seller_warehouses"),
        }
    }
}

/// How a batch was obtained
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: SourceKind,
    /// Served from an expired cache entry after a failed refresh
    pub stale: bool,
    /// Pagination stopped at the page bound while the upstream still had data
    pub truncated: bool,
    pub fetched_at: DateTime<Utc>,
}

/// Records plus their provenance. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RecordBatch<T> {
    pub records: Arc<Vec<T>>,
    pub provenance: Provenance,
}

impl<T> RecordBatch<T> {
    pub fn new(records: Vec<T>, source: SourceKind, truncated: bool) -> Self {
        RecordBatch {
            records: Arc::new(records),
            provenance: Provenance {
                source,
                stale: false,
                truncated,
                fetched_at: Utc::now(),
            },
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Same records, flagged as stale
    pub fn into_stale(mut self) -> Self {
        self.provenance.stale = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marketplace_codes() {
        for id in MarketplaceId::ALL {
            assert_eq!(MarketplaceId::from_code(id.code()), Some(id));
        }
        assert_eq!(MarketplaceId::from_code("WB"), Some(MarketplaceId::Wildberries));
        assert_eq!(MarketplaceId::from_code("amazon"), None);
    }

    #[test]
    fn test_money_conversion() {
        assert_eq!(Money::from_major(1299.5).minor(), 129950);
        assert_eq!(Money::from_major(0.1 + 0.2).minor(), 30);
        assert_eq!(Money::from_minor(150).as_major(), 1.5);
    }

    #[test]
    fn test_new_record_has_no_quantities() {
        let record = StockRecord::new(MarketplaceId::Ozon, "store-1");
        assert_eq!(record.quantity, None);
        assert_eq!(record.reserved, None);
        assert_eq!(record.store_id, "store-1");
    }

    #[test]
    fn test_batch_stale_flag() {
        let batch = RecordBatch::new(vec![1, 2, 3], SourceKind::Report, false);
        assert!(!batch.provenance.stale);
        let stale = batch.clone().into_stale();
        assert!(stale.provenance.stale);
        assert_eq!(stale.len(), 3);
    }
}
