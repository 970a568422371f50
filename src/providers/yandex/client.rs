//! Yandex Market Partner API Client Implementation
//!
//! API Docs: https://yandex.ru/dev/market/partner-api/doc/

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use super::models::{OfferFilter, StocksReportRequest};
use super::schemas::{NEXT_PAGE_TOKEN, OFFER_PRICES, OFFER_STOCKS, REPORT_STOCK, STOCKS_REPORT};
use crate::config::YandexMarketEndpoints;
use crate::domain::{MarketplaceId, PriceRecord, Query, SourceKind, StockRecord, StoreCredential};
use crate::providers::facade::ClientContext;
use crate::providers::http_client::ApiRequest;
use crate::providers::normalizer::{lookup, normalize_prices, normalize_stock, normalize_stock_payload};
use crate::providers::paginator::Cursor;
use crate::providers::rate_governor::{EndpointClass, RateKey};
use crate::providers::report::{ReportApi, ReportProfile, ResultHandle};
use crate::providers::traits::{Fetched, MarketplaceClient, MarketplaceError, MarketplaceResult};

/// Largest page the offer stocks listing accepts
const MAX_LIMIT: usize = 200;

/// Yandex Market Partner API client
pub struct YandexMarketClient {
    ctx: ClientContext,
    endpoints: YandexMarketEndpoints,
}

impl YandexMarketClient {
    pub fn new(ctx: ClientContext) -> Self {
        let endpoints = ctx.settings.endpoints.yandex_market.clone();
        YandexMarketClient { ctx, endpoints }
    }

    fn campaign_id(store: &StoreCredential) -> MarketplaceResult<u64> {
        store
            .campaign_id
            .as_deref()
            .and_then(|id| id.trim().parse::<u64>().ok())
            .ok_or_else(|| {
                MarketplaceError::NotConfigured(format!(
                    "yandex market store {} has no valid campaign id",
                    store.store_id
                ))
            })
    }

    fn request(&self, method: Method, path: &str, class: EndpointClass, store: &StoreCredential) -> ApiRequest {
        let url = format!("{}{}", self.endpoints.partner.trim_end_matches('/'), path);
        ApiRequest::new(method, url, RateKey::new(MarketplaceId::YandexMarket, class))
            .header("Api-Key", &store.api_key)
    }

    /// One page of a campaign listing, `page_token` echoed verbatim
    async fn campaign_page(
        &self,
        listing: &str,
        class: EndpointClass,
        store: &StoreCredential,
        query: &Query,
        cursor: Cursor,
    ) -> MarketplaceResult<(Value, Option<Cursor>)> {
        let campaign_id = Self::campaign_id(store)?;
        let path = format!("/campaigns/{}/{}", campaign_id, listing);
        let limit = self.ctx.settings.pagination.page_size.clamp(1, MAX_LIMIT);

        let mut request = self
            .request(Method::POST, &path, class, store)
            .query("limit", limit)
            .json_body(&OfferFilter {
                offer_ids: query.skus.clone(),
            })?;
        if let Some(token) = cursor.as_param() {
            request = request.query("page_token", token);
        }

        let payload: Value = self.ctx.transport.send_json(&request).await?;
        let next = Cursor::token(lookup(&payload, NEXT_PAGE_TOKEN).and_then(Value::as_str));
        Ok((payload, next))
    }

    async fn stock_from_report(
        &self,
        store: &StoreCredential,
        query: &Query,
    ) -> MarketplaceResult<Fetched<StockRecord>> {
        let payload = self.ctx.reports.run(self, store, query).await?;
        let records: Vec<StockRecord> =
            normalize_stock_payload(&REPORT_STOCK, MarketplaceId::YandexMarket, &store.store_id, &payload)?
                .into_iter()
                .filter(|r| query.matches_stock(r))
                .collect();

        debug!(store = %store.store_id, records = records.len(), "Stocks report normalized");
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
                    .campaign_page("offers/stocks", EndpointClass::General, store, query, cursor)
                    .await?;
                let records = normalize_stock(&OFFER_STOCKS, MarketplaceId::YandexMarket, &store.store_id, &payload)?;
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
impl MarketplaceClient for YandexMarketClient {
    fn marketplace(&self) -> MarketplaceId {
        MarketplaceId::YandexMarket
    }

    fn name(&self) -> &'static str {
        "Yandex Market"
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
                    .campaign_page("offer-prices", EndpointClass::Prices, store, query, cursor)
                    .await?;
                let records = normalize_prices(&OFFER_PRICES, MarketplaceId::YandexMarket, &store.store_id, &payload)?;
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
impl ReportApi for YandexMarketClient {
    fn marketplace(&self) -> MarketplaceId {
        MarketplaceId::YandexMarket
    }

    fn profile(&self) -> &ReportProfile {
        &STOCKS_REPORT
    }

    async fn submit(&self, store: &StoreCredential, _query: &Query) -> MarketplaceResult<Value> {
        let body = StocksReportRequest {
            campaign_id: Self::campaign_id(store)?,
        };
        let request = self
            .request(Method::POST, "/reports/stocks-on-warehouses/generate", EndpointClass::ReportSubmit, store)
            .query("format", "CSV")
            .json_body(&body)?;
        self.ctx.transport.send_json(&request).await
    }

    async fn poll(&self, store: &StoreCredential, job_id: &str) -> MarketplaceResult<Value> {
        let path = format!("/reports/info/{}", job_id);
        let request = self.request(Method::GET, &path, EndpointClass::ReportPoll, store);
        self.ctx.transport.send_json(&request).await
    }

    async fn download(&self, _store: &StoreCredential, handle: &ResultHandle) -> MarketplaceResult<Bytes> {
        match handle {
            ResultHandle::Url(url) => {
                let request = ApiRequest::get(
                    url.clone(),
                    RateKey::new(MarketplaceId::YandexMarket, EndpointClass::ReportDownload),
                );
                self.ctx.transport.send_raw(&request).await
            }
            ResultHandle::Inline(payload) => Ok(payload.body.clone()),
            ResultHandle::JobId(report_id) => Err(MarketplaceError::parse(
                format!("report {} is ready but has no file link", report_id),
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
        settings
    }

    fn client(backend: Arc<ScriptedBackend>) -> YandexMarketClient {
        YandexMarketClient::new(ClientContext::new(Arc::new(settings()), backend))
    }

    fn store() -> StoreCredential {
        StoreCredential::new("ym-main", MarketplaceId::YandexMarket, "ym-key").with_campaign_id("21000001")
    }

    #[tokio::test(start_paused = true)]
    async fn test_stock_from_csv_report() {
        let csv = "Ваш SKU,Склад,Доступно для заказа,Резерв\nKB-1,Софьино,7,2\nKB-2,Софьино,,\n";
        let backend = Arc::new(
            ScriptedBackend::new()
                .json_route(
                    Method::POST,
                    "/reports/stocks-on-warehouses/generate",
                    vec![json!({ "status": "OK", "result": { "reportId": "rep-9", "estimatedGenerationTime": 2000 } })],
                )
                .json_route(
                    Method::GET,
                    "/reports/info/rep-9",
                    vec![
                        json!({ "status": "OK", "result": { "status": "PENDING" } }),
                        json!({ "status": "OK", "result": { "status": "PROCESSING" } }),
                        json!({ "status": "OK", "result": { "status": "DONE", "file": "https://storage.yandex/rep-9.csv" } }),
                    ],
                )
                .route(Method::GET, "rep-9.csv", vec![Ok(ApiResponse::new(200, csv))]),
        );
        let client = client(backend.clone());

        let fetched = client
            .fetch_stock_from(SourceKind::Report, &store(), &Query::all())
            .await
            .unwrap();

        assert_eq!(fetched.records.len(), 2);
        assert_eq!(fetched.records[0].sku.as_deref(), Some("KB-1"));
        assert_eq!((fetched.records[0].quantity, fetched.records[0].reserved), (Some(7), Some(2)));
        assert_eq!((fetched.records[1].quantity, fetched.records[1].reserved), (None, None));

        let submit = &backend.calls_to("/generate")[0];
        assert_eq!(submit.query, vec![("format".to_string(), "CSV".to_string())]);
        assert_eq!(submit.body, Some(json!({ "campaignId": 21000001 })));
        assert_eq!(backend.calls_to("/reports/info/").len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offer_stocks_exploded_by_warehouse() {
        let backend = Arc::new(ScriptedBackend::new().json_route(
            Method::POST,
            "/campaigns/21000001/offers/stocks",
            vec![
                json!({ "status": "OK", "result": {
                    "paging": { "nextPageToken": "tok-2" },
                    "warehouses": [
                        { "warehouseId": 100, "offers": [
                            { "offerId": "KB-1", "updatedAt": "2024-03-01T10:00:00+03:00",
                              "stocks": [{ "type": "FIT", "count": 7 }, { "type": "FREEZE", "count": 2 }] },
                            { "offerId": "KB-2", "stocks": [{ "type": "DEFECT", "count": 1 }] }
                        ]}
                    ]
                }}),
                json!({ "status": "OK", "result": {
                    "paging": {},
                    "warehouses": [{ "warehouseId": 200, "offers": [{ "offerId": "KB-1", "stocks": [{ "type": "FIT", "count": 1 }] }] }]
                }}),
            ],
        ));
        let client = client(backend.clone());

        let fetched = client
            .fetch_stock_from(SourceKind::Paginated, &store(), &Query::all())
            .await
            .unwrap();

        let records = &fetched.records;
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].warehouse_id.as_deref(), Some("100"));
        assert_eq!((records[0].quantity, records[0].reserved), (Some(7), Some(2)));
        assert_eq!(records[0].last_change.map(|t| t.to_rfc3339()).as_deref(), Some("2024-03-01T07:00:00+00:00"));
        assert_eq!(records[1].quantity, None);
        assert_eq!(records[2].warehouse_id.as_deref(), Some("200"));

        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
        assert!(!calls[0].query.iter().any(|(k, _)| k == "page_token"));
        assert!(calls[1].query.contains(&("page_token".to_string(), "tok-2".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_offer_prices() {
        let backend = Arc::new(ScriptedBackend::new().json_route(
            Method::POST,
            "/campaigns/21000001/offer-prices",
            vec![json!({ "status": "OK", "result": {
                "offers": [
                    { "offerId": "KB-1", "price": { "value": 2490, "discountBase": 2990, "currencyId": "RUR" }, "updatedAt": "2024-02-10T12:00:00Z" },
                    { "offerId": "KB-2", "price": { "value": 990.5 } }
                ],
                "paging": {}
            }})],
        ));
        let client = client(backend.clone());

        let fetched = client.fetch_prices(&store(), &Query::all()).await.unwrap();

        assert_eq!(fetched.records.len(), 2);
        assert_eq!(fetched.records[0].price.map(|m| m.minor()), Some(249_000));
        assert_eq!(fetched.records[0].old_price.map(|m| m.minor()), Some(299_000));
        assert!(fetched.records[0].timestamp.is_some());
        assert_eq!(fetched.records[1].price.map(|m| m.minor()), Some(99_050));
        assert_eq!(fetched.records[1].currency.as_deref(), Some("RUR"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_campaign_is_not_configured() {
        let backend = Arc::new(ScriptedBackend::new());
        let client = client(backend.clone());
        let store = StoreCredential::new("ym-main", MarketplaceId::YandexMarket, "ym-key");

        let err = client.fetch_prices(&store, &Query::all()).await.unwrap_err();

        assert!(matches!(err, MarketplaceError::NotConfigured(_)));
        assert!(backend.calls().is_empty());
    }
}
