//! Store credentials and fetch queries
//!
//! Both are supplied by outer layers (configuration management, UI/CLI);
//! the access layer only reads them.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::records::{MarketplaceId, PriceRecord, StockRecord};

// ============================================================================
// Credentials
// ============================================================================

/// One seller account on one marketplace
#[derive(Clone, Serialize, Deserialize)]
pub struct StoreCredential {
    pub store_id: String,
    pub marketplace: MarketplaceId,
    /// API token / key
    pub api_key: String,
    /// Ozon Client-Id
    pub client_id: Option<String>,
    /// Yandex Market campaign id
    pub campaign_id: Option<String>,
    /// Yandex Market business id
    pub business_id: Option<String>,
}

impl StoreCredential {
    pub fn new(store_id: &str, marketplace: MarketplaceId, api_key: &str) -> Self {
        StoreCredential {
            store_id: store_id.to_string(),
            marketplace,
            api_key: api_key.to_string(),
            client_id: None,
            campaign_id: None,
            business_id: None,
        }
    }

    pub fn with_client_id(mut self, client_id: &str) -> Self {
        self.client_id = Some(client_id.to_string());
        self
    }

    pub fn with_campaign_id(mut self, campaign_id: &str) -> Self {
        self.campaign_id = Some(campaign_id.to_string());
        self
    }

    /// Read credentials from `<STORE>_API_KEY`, `<STORE>_CLIENT_ID`,
    /// `<STORE>_CAMPAIGN_ID` and `<STORE>_BUSINESS_ID`.
    pub fn from_env(store_id: &str, marketplace: MarketplaceId) -> Self {
        let prefix = store_id.to_uppercase().replace(['-', '.', ' '], "_");
        StoreCredential {
            store_id: store_id.to_string(),
            marketplace,
            api_key: std::env::var(format!("{}_API_KEY", prefix)).unwrap_or_default(),
            client_id: std::env::var(format!("{}_CLIENT_ID", prefix)).ok(),
            campaign_id: std::env::var(format!("{}_CAMPAIGN_ID", prefix)).ok(),
            business_id: std::env::var(format!("{}_BUSINESS_ID", prefix)).ok(),
        }
    }

    /// Check if an API key is present
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

impl std::fmt::Debug for StoreCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCredential")
            .field("store_id", &self.store_id)
            .field("marketplace", &self.marketplace)
            .field("api_key", &"****")
            .field("client_id", &self.client_id)
            .field("campaign_id", &self.campaign_id)
            .field("business_id", &self.business_id)
            .finish()
    }
}

// ============================================================================
// Query
// ============================================================================

/// What to fetch: an optional date range, warehouse filter and SKU list.
///
/// `date_from` is where change-based listings start. `date_to` is an
/// inclusive upper bound on a record's last change; records that carry no
/// change timestamp (report snapshots) always pass it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    #[serde(default)]
    pub warehouses: Vec<String>,
    #[serde(default)]
    pub skus: Vec<String>,
}

impl Query {
    pub fn all() -> Self {
        Query::default()
    }

    pub fn since(date_from: NaiveDate) -> Self {
        Query {
            date_from: Some(date_from),
            ..Default::default()
        }
    }

    /// Drop records last changed after the end of `date_to`
    pub fn until(mut self, date_to: NaiveDate) -> Self {
        self.date_to = Some(date_to);
        self
    }

    pub fn with_skus<I, S>(mut self, skus: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skus = skus.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_warehouses<I, S>(mut self, warehouses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.warehouses = warehouses.into_iter().map(Into::into).collect();
        self
    }

    /// Stable hash of the query, independent of filter ordering
    pub fn signature(&self) -> String {
        let mut warehouses = self.warehouses.clone();
        warehouses.sort();
        warehouses.dedup();
        let mut skus = self.skus.clone();
        skus.sort();
        skus.dedup();

        let canonical = serde_json::json!({
            "date_from": self.date_from.map(|d| d.to_string()),
            "date_to": self.date_to.map(|d| d.to_string()),
            "warehouses": warehouses,
            "skus": skus,
        });

        let digest = Sha256::digest(canonical.to_string().as_bytes());
        hex::encode(&digest[..16])
    }

    fn wants_sku(&self, sku: Option<&str>) -> bool {
        self.skus.is_empty() || sku.is_some_and(|sku| self.skus.iter().any(|s| s == sku))
    }

    /// SKU and warehouse filters; an empty filter matches everything.
    /// Warehouses match by id or by name.
    pub fn matches_stock(&self, record: &StockRecord) -> bool {
        let warehouse_ok = self.warehouses.is_empty()
            || self.warehouses.iter().any(|w| {
                record.warehouse_id.as_deref() == Some(w.as_str())
                    || record
                        .warehouse_name
                        .as_deref()
                        .is_some_and(|name| name.eq_ignore_ascii_case(w))
            });
        warehouse_ok && self.wants_sku(record.sku.as_deref()) && self.changed_in_range(record)
    }

    fn changed_in_range(&self, record: &StockRecord) -> bool {
        match (self.date_to, record.last_change) {
            (Some(date_to), Some(changed)) => changed.date_naive() <= date_to,
            _ => true,
        }
    }

    pub fn matches_price(&self, record: &PriceRecord) -> bool {
        self.wants_sku(record.sku.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_ignores_filter_order() {
        let a = Query::all().with_skus(["b", "a"]).with_warehouses(["w1", "w2"]);
        let b = Query::all().with_skus(["a", "b", "a"]).with_warehouses(["w2", "w1"]);
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn test_signature_distinguishes_dates() {
        let a = Query::since(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let b = Query::since(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_ne!(a.signature(), b.signature());
        assert_eq!(a.signature().len(), 32);
    }

    #[test]
    fn test_date_to_bounds_last_change() {
        let query = Query::all().until(NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
        let at = |raw: &str| {
            let mut record = StockRecord::new(MarketplaceId::Wildberries, "main");
            record.last_change = Some(raw.parse().unwrap());
            record
        };

        assert!(query.matches_stock(&at("2024-03-02T23:59:59Z")));
        assert!(!query.matches_stock(&at("2024-03-03T00:00:00Z")));
        assert!(query.matches_stock(&StockRecord::new(MarketplaceId::Wildberries, "main")));
        assert_ne!(query.signature(), Query::all().signature());
    }

    #[test]
    fn test_debug_masks_api_key() {
        let cred = StoreCredential::new("main", MarketplaceId::Wildberries, "super-secret");
        let printed = format!("{:?}", cred);
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("****"));
    }

    #[test]
    fn test_stock_filters() {
        let mut record = StockRecord::new(MarketplaceId::Wildberries, "main");
        record.sku = Some("A-1".into());
        record.warehouse_name = Some("Коледино".into());

        assert!(Query::all().matches_stock(&record));
        assert!(Query::all().with_skus(["A-1"]).matches_stock(&record));
        assert!(!Query::all().with_skus(["B-2"]).matches_stock(&record));
        assert!(Query::all().with_warehouses(["Коледино"]).matches_stock(&record));
        assert!(!Query::all().with_warehouses(["507"]).matches_stock(&record));

        record.warehouse_id = Some("507".into());
        assert!(Query::all().with_warehouses(["507"]).matches_stock(&record));
    }

    #[test]
    fn test_credentials_configured() {
        let cred = StoreCredential::new("main", MarketplaceId::Ozon, "  ");
        assert!(!cred.is_configured());
        let cred = cred.with_client_id("123");
        assert_eq!(cred.client_id.as_deref(), Some("123"));
    }
}
