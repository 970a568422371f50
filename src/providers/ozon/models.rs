//! Ozon API Request Models
//!
//! Responses are read through the normalizer schemas; only request bodies
//! are typed.

use serde::Serialize;

// ============================================================================
// Reports
// ============================================================================

/// `POST /v1/report/warehouse/stock`
#[derive(Debug, Serialize)]
pub struct WarehouseStockReportRequest {
    pub language: &'static str,
    #[serde(rename = "warehouseId", skip_serializing_if = "Vec::is_empty")]
    pub warehouse_id: Vec<String>,
}

/// `POST /v1/report/info`
#[derive(Debug, Serialize)]
pub struct ReportInfoRequest<'a> {
    pub code: &'a str,
}

// ============================================================================
// Listings
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ProductFilter {
    pub visibility: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub offer_id: Vec<String>,
}

impl ProductFilter {
    /// All products, optionally narrowed to seller articles
    pub fn for_offers(offer_ids: &[String]) -> Self {
        ProductFilter {
            visibility: "ALL",
            offer_id: offer_ids.to_vec(),
        }
    }
}

/// Body shared by `/v4/product/info/stocks` and `/v5/product/info/prices`
#[derive(Debug, Serialize)]
pub struct ListingRequest {
    pub filter: ProductFilter,
    pub limit: usize,
    pub cursor: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_listing_request_shape() {
        let request = ListingRequest {
            filter: ProductFilter::for_offers(&[]),
            limit: 100,
            cursor: String::new(),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({ "filter": { "visibility": "ALL" }, "limit": 100, "cursor": "" })
        );
    }

    #[test]
    fn test_report_request_omits_empty_warehouses() {
        let request = WarehouseStockReportRequest { language: "DEFAULT", warehouse_id: vec![] };
        assert_eq!(serde_json::to_value(&request).unwrap(), json!({ "language": "DEFAULT" }));
    }
}
