//! Ozon Seller API Client Implementation
//!
//! API Docs: https://docs.ozon.ru/api/seller/

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use super::models::{ListingRequest, ProductFilter, ReportInfoRequest, WarehouseStockReportRequest};
use super::schemas::{CURSOR_PATHS, PRODUCT_PRICES, PRODUCT_STOCKS, REPORT_STOCK, STOCK_REPORT};
use crate::config::OzonEndpoints;
use crate::domain::{MarketplaceId, PriceRecord, Query, SourceKind, StockRecord, StoreCredential};
use crate::providers::facade::ClientContext;
use crate::providers::http_client::ApiRequest;
use crate::providers::normalizer::{lookup, normalize_prices, normalize_stock, normalize_stock_payload};
use crate::providers::paginator::Cursor;
use crate::providers::rate_governor::{EndpointClass, RateKey};
use crate::providers::report::{ReportApi, ReportProfile, ResultHandle};
use crate::providers::traits::{Fetched, MarketplaceClient, MarketplaceError, MarketplaceResult};

/// Largest page the listing endpoints accept
const MAX_LIMIT: usize = 1000;

/// Ozon Seller API client
pub struct OzonClient {
    ctx: ClientContext,
    endpoints: OzonEndpoints,
}

impl OzonClient {
    pub fn new(ctx: ClientContext) -> Self {
        let endpoints = ctx.settings.endpoints.ozon.clone();
        OzonClient { ctx, endpoints }
    }

    /// Authenticated POST. Ozon rejects calls without a client id.
    fn request(
        &self,
        path: &str,
        class: EndpointClass,
        store: &StoreCredential,
    ) -> MarketplaceResult<ApiRequest> {
        let client_id = store
            .client_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                MarketplaceError::NotConfigured(format!("ozon store {} has no client id", store.store_id))
            })?;

        let url = format!("{}{}", self.endpoints.seller.trim_end_matches('/'), path);
        Ok(ApiRequest::post(url, RateKey::new(MarketplaceId::Ozon, class))
            .header("Client-Id", client_id)
            .header("Api-Key", &store.api_key))
    }

    fn page_size(&self) -> usize {
        self.ctx.settings.pagination.page_size.clamp(1, MAX_LIMIT)
    }

    fn next_cursor(payload: &Value) -> Option<Cursor> {
        CURSOR_PATHS
            .iter()
            .find_map(|path| lookup(payload, path).and_then(Value::as_str))
            .and_then(|token| Cursor::token(Some(token)))
    }

    async fn listing_page(
        &self,
        path: &str,
        class: EndpointClass,
        store: &StoreCredential,
        query: &Query,
        cursor: Cursor,
    ) -> MarketplaceResult<(Value, Option<Cursor>)> {
        let body = ListingRequest {
            filter: ProductFilter::for_offers(&query.skus),
            limit: self.page_size(),
            cursor: cursor.as_param().unwrap_or_default(),
        };
        let request = self.request(path, class, store)?.json_body(&body)?;

        let payload: Value = self.ctx.transport.send_json(&request).await?;
        let next = Self::next_cursor(&payload);
        Ok((payload, next))
    }

    async fn stock_from_report(
        &self,
        store: &StoreCredential,
        query: &Query,
    ) -> MarketplaceResult<Fetched<StockRecord>> {
        let payload = self.ctx.reports.run(self, store, query).await?;
        let records: Vec<StockRecord> = normalize_stock_payload(&REPORT_STOCK, MarketplaceId::Ozon, &store.store_id, &payload)?
            .into_iter()
            .filter(|r| query.matches_stock(r))
            .collect();

        debug!(store = %store.store_id, records = records.len(), "Stock report normalized");
        Ok(Fetched::complete(records))
    }

    async fn stock_from_listing(
        &self,
        store: &StoreCredential,
        query: &Query,
    ) -> MarketplaceResult<Fetched<StockRecord>> {
        let paged = self
            .ctx
            .paginator
            .collect(Cursor::Start, move |cursor| async move {
                let (payload, next) = self
                    .listing_page("/v4/product/info/stocks", EndpointClass::General, store, query, cursor)
                    .await?;
                let records = normalize_stock(&PRODUCT_STOCKS, MarketplaceId::Ozon, &store.store_id, &payload)?;
                Ok((records, next))
            })
            .await?;

        let records = paged.items.into_iter().filter(|r| query.matches_stock(r)).collect();
        Ok(Fetched {
            records,
            truncated: !paged.exhausted,
        })
    }
}

#[async_trait]
impl MarketplaceClient for OzonClient {
    fn marketplace(&self) -> MarketplaceId {
        MarketplaceId::Ozon
    }

    fn name(&self) -> &'static str {
        "Ozon"
    }

    fn stock_sources(&self) -> &'static [SourceKind] {
        &[SourceKind::Report, SourceKind::Paginated]
    }

    async fn fetch_stock_from(
        &self,
        source: SourceKind,
        store: &StoreCredential,
        query: &Query,
    ) -> MarketplaceResult<Fetched<StockRecord>> {
        match source {
            SourceKind::Report => self.stock_from_report(store, query).await,
            SourceKind::Paginated => self.stock_from_listing(store, query).await,
            other => Err(MarketplaceError::unsupported_source(self.name(), other)),
        }
    }

    async fn fetch_prices(
        &self,
        store: &StoreCredential,
        query: &Query,
    ) -> MarketplaceResult<Fetched<PriceRecord>> {
        let paged = self
            .ctx
            .paginator
            .collect(Cursor::Start, move |cursor| async move {
                let (payload, next) = self
                    .listing_page("/v5/product/info/prices", EndpointClass::Prices, store, query, cursor)
                    .await?;
                let records = normalize_prices(&PRODUCT_PRICES, MarketplaceId::Ozon, &store.store_id, &payload)?;
                Ok((records, next))
            })
            .await?;

        let records = paged.items.into_iter().filter(|r| query.matches_price(r)).collect();
        Ok(Fetched {
            records,
            truncated: !paged.exhausted,
        })
    }
}

#[async_trait]
impl ReportApi for OzonClient {
    fn marketplace(&self) -> MarketplaceId {
        MarketplaceId::Ozon
    }

    fn profile(&self) -> &ReportProfile {
        &STOCK_REPORT
    }

    async fn submit(&self, store: &StoreCredential, query: &Query) -> MarketplaceResult<Value> {
        // Names cannot be sent upstream; they are matched after download
        let warehouse_id = query
            .warehouses
            .iter()
            .filter(|w| !w.is_empty() && w.chars().all(|c| c.is_ascii_digit()))
            .cloned()
            .collect();
        let body = WarehouseStockReportRequest {
            language: "DEFAULT",
            warehouse_id,
        };

        let request = self
            .request("/v1/report/warehouse/stock", EndpointClass::ReportSubmit, store)?
            .json_body(&body)?;
        self.ctx.transport.send_json(&request).await
    }

    async fn poll(&self, store: &StoreCredential, job_id: &str) -> MarketplaceResult<Value> {
        let request = self
            .request("/v1/report/info", EndpointClass::ReportPoll, store)?
            .json_body(&ReportInfoRequest { code: job_id })?;
        self.ctx.transport.send_json(&request).await
    }

    async fn download(&self, _store: &StoreCredential, handle: &ResultHandle) -> MarketplaceResult<Bytes> {
        match handle {
            ResultHandle::Url(url) => {
                let request = ApiRequest::get(
                    url.clone(),
                    RateKey::new(MarketplaceId::Ozon, EndpointClass::ReportDownload),
                );
                self.ctx.transport.send_raw(&request).await
            }
            ResultHandle::Inline(payload) => Ok(payload.body.clone()),
            ResultHandle::JobId(code) => Err(MarketplaceError::parse(
                format!("report {} is ready but has no file link", code),
                "",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimitSettings, Settings};
    use crate::providers::http_client::testing::ScriptedBackend;
    use crate::providers::http_client::ApiResponse;
    use serde_json::json;
    use std::sync::Arc;

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.rate_limits = RateLimitSettings::uniform(0);
        settings.reports.poll_interval_secs = 1;
        settings.pagination.page_size = 2;
        settings
    }

    fn client(backend: Arc<ScriptedBackend>) -> OzonClient {
        OzonClient::new(ClientContext::new(Arc::new(settings()), backend))
    }

    fn store() -> StoreCredential {
        StoreCredential::new("ozon-main", MarketplaceId::Ozon, "ozon-key").with_client_id("12345")
    }

    #[tokio::test(start_paused = true)]
    async fn test_stock_from_csv_report() {
        let csv = "\u{feff}Артикул;SKU;Склад;Доступно к продаже;Зарезервировано\n\
                   TS-1;9001;Хоругвино;12;1\n\
                   TS-2;9002;Тверь;0;0\n";
        let backend = Arc::new(
            ScriptedBackend::new()
                .json_route(Method::POST, "/v1/report/warehouse/stock", vec![json!({ "result": { "code": "R-1" } })])
                .json_route(
                    Method::POST,
                    "/v1/report/info",
                    vec![
                        json!({ "result": { "code": "R-1", "status": "processing", "file": "" } }),
                        json!({ "result": { "code": "R-1", "status": "success", "file": "https://cdn.ozon.ru/r/R-1.csv" } }),
                    ],
                )
                .route(Method::GET, "/r/R-1.csv", vec![Ok(ApiResponse::new(200, csv))]),
        );
        let client = client(backend.clone());

        let fetched = client
            .fetch_stock_from(SourceKind::Report, &store(), &Query::all())
            .await
            .unwrap();

        assert_eq!(fetched.records.len(), 2);
        let first = &fetched.records[0];
        assert_eq!(first.sku.as_deref(), Some("TS-1"));
        assert_eq!(first.item_id.as_deref(), Some("9001"));
        assert_eq!(first.warehouse_name.as_deref(), Some("Хоругвино"));
        assert_eq!((first.quantity, first.reserved), (Some(12), Some(1)));

        let submit = &backend.calls_to("/v1/report/warehouse/stock")[0];
        assert_eq!(submit.body, Some(json!({ "language": "DEFAULT" })));
        assert_eq!(backend.calls_to("/v1/report/info")[0].body, Some(json!({ "code": "R-1" })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stock_listing_follows_cursor() {
        let backend = Arc::new(ScriptedBackend::new().json_route(
            Method::POST,
            "/v4/product/info/stocks",
            vec![
                json!({
                    "items": [
                        { "offer_id": "A", "product_id": 1, "stocks": [
                            { "type": "fbo", "present": 5, "reserved": 1, "sku": 11 },
                            { "type": "fbs", "present": 2, "reserved": 0, "sku": 12 }
                        ]},
                        { "offer_id": "B", "product_id": 2, "stocks": [] }
                    ],
                    "cursor": "c-1",
                    "total": 3
                }),
                json!({ "items": [{ "offer_id": "C", "product_id": 3, "stocks": [{ "type": "fbo", "present": 0, "reserved": 0 }] }], "cursor": "c-2" }),
                json!({ "items": [], "cursor": "" }),
            ],
        ));
        let client = client(backend.clone());

        let fetched = client
            .fetch_stock_from(SourceKind::Paginated, &store(), &Query::all())
            .await
            .unwrap();

        let skus: Vec<_> = fetched.records.iter().map(|r| r.sku.clone().unwrap()).collect();
        assert_eq!(skus, vec!["A", "A", "B", "C"]);
        assert_eq!(fetched.records[1].warehouse_name.as_deref(), Some("fbs"));
        assert_eq!(fetched.records[2].quantity, None);
        assert!(!fetched.truncated);

        let cursors: Vec<Value> = backend
            .calls()
            .iter()
            .map(|c| c.body.as_ref().unwrap()["cursor"].clone())
            .collect();
        assert_eq!(cursors, vec![json!(""), json!("c-1"), json!("c-2")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prices_with_legacy_last_id() {
        let backend = Arc::new(ScriptedBackend::new().json_route(
            Method::POST,
            "/v5/product/info/prices",
            vec![
                json!({ "result": {
                    "items": [{ "offer_id": "A", "product_id": 1, "price": { "price": "1299.00", "old_price": "1500", "currency_code": "RUB" } }],
                    "last_id": "bnVsbA=="
                }}),
                json!({ "result": { "items": [], "last_id": "" } }),
            ],
        ));
        let client = client(backend.clone());

        let fetched = client
            .fetch_prices(&store(), &Query::all().with_skus(["A"]))
            .await
            .unwrap();

        assert_eq!(fetched.records.len(), 1);
        assert_eq!(fetched.records[0].price.map(|m| m.minor()), Some(129_900));
        assert_eq!(fetched.records[0].old_price.map(|m| m.minor()), Some(150_000));
        assert_eq!(fetched.records[0].currency.as_deref(), Some("RUB"));

        let first = backend.calls()[0].body.clone().unwrap();
        assert_eq!(first["filter"]["offer_id"], json!(["A"]));
        assert_eq!(backend.calls()[1].body.as_ref().unwrap()["cursor"], json!("bnVsbA=="));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_client_id_is_not_configured() {
        let backend = Arc::new(ScriptedBackend::new());
        let client = client(backend.clone());
        let store = StoreCredential::new("ozon-main", MarketplaceId::Ozon, "ozon-key");

        let err = client
            .fetch_stock_from(SourceKind::Paginated, &store, &Query::all())
            .await
            .unwrap_err();

        assert!(matches!(err, MarketplaceError::NotConfigured(_)));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_headers() {
        let backend = Arc::new(
            ScriptedBackend::new().json_route(Method::POST, "/v4/product/info/stocks", vec![json!({ "items": [] })]),
        );
        let client = client(backend.clone());

        client
            .fetch_stock_from(SourceKind::Paginated, &store(), &Query::all())
            .await
            .unwrap();

        let call = &backend.calls()[0];
        assert_eq!(call.url, "https://api-seller.ozon.ru/v4/product/info/stocks");
        assert!(call.headers.contains(&("Client-Id".to_string(), "12345".to_string())));
        assert!(call.headers.contains(&("Api-Key".to_string(), "ozon-key".to_string())));
    }
}
