//! Yandex Market API Request Models

use serde::Serialize;

/// `POST /reports/stocks-on-warehouses/generate`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StocksReportRequest {
    pub campaign_id: u64,
}

/// Body of the campaign offer listings, narrowed to seller SKUs when given
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferFilter {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub offer_ids: Vec<String>,
}
