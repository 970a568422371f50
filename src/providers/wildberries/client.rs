//! Wildberries API Client Implementation
//!
//! Implements [`MarketplaceClient`] and [`ReportApi`] for Wildberries.
//!
//! API Docs: https://dev.wildberries.ru/openapi/

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

use super::models::{CardsListRequest, SellerStocksRequest};
use super::schemas::{
    GOODS_PRICES, REMAINS_REPORT, REMAINS_STOCK, SELLER_STOCKS, SUMMARY_WAREHOUSES, SUPPLIER_STOCKS,
};
use crate::config::WildberriesEndpoints;
use crate::domain::{MarketplaceId, PriceRecord, Query, SourceKind, StockRecord, StoreCredential};
use crate::providers::facade::ClientContext;
use crate::providers::http_client::ApiRequest;
use crate::providers::normalizer::{
    lookup, normalize_prices, normalize_stock, normalize_stock_payload, parse_timestamp, rows,
};
use crate::providers::paginator::Cursor;
use crate::providers::rate_governor::{EndpointClass, RateKey};
use crate::providers::report::{ReportApi, ReportProfile, ResultHandle};
use crate::providers::traits::{Fetched, MarketplaceClient, MarketplaceError, MarketplaceResult};

/// Lower bound for a full statistics listing
const FIRST_CHANGE_DATE: &str = "2019-06-20T00:00:00";

const REMAINS_PATH: &str = "/api/v1/warehouse_remains";

const CARDS_PATH: &str = "/content/v2/get/cards/list";

const CARDS_PAGE_LIMIT: usize = 100;

/// Size ids per seller-warehouse stock request
const SELLER_STOCKS_CHUNK: usize = 1000;

/// Wildberries API client
pub struct WildberriesClient {
    ctx: ClientContext,
    endpoints: WildberriesEndpoints,
}

impl WildberriesClient {
    pub fn new(ctx: ClientContext) -> Self {
        let endpoints = ctx.settings.endpoints.wildberries.clone();
        WildberriesClient { ctx, endpoints }
    }

    /// Authenticated request against one of the Wildberries hosts
    fn request(
        &self,
        method: Method,
        base: &str,
        path: &str,
        class: EndpointClass,
        store: &StoreCredential,
    ) -> ApiRequest {
        let url = format!("{}{}", base.trim_end_matches('/'), path);
        ApiRequest::new(method, url, RateKey::new(MarketplaceId::Wildberries, class))
            .header("Authorization", &store.api_key)
    }

    async fn stock_from_report(
        &self,
        store: &StoreCredential,
        query: &Query,
    ) -> MarketplaceResult<Fetched<StockRecord>> {
        let payload = self.ctx.reports.run(self, store, query).await?;
        let records = normalize_stock_payload(&REMAINS_STOCK, MarketplaceId::Wildberries, &store.store_id, &payload)?;

        let total = records.len();
        let records: Vec<StockRecord> = records
            .into_iter()
            .filter(|r| {
                !r.warehouse_name
                    .as_deref()
                    .is_some_and(|name| SUMMARY_WAREHOUSES.contains(&name))
            })
            .filter(|r| query.matches_stock(r))
            .collect();

        debug!(store = %store.store_id, total, kept = records.len(), "Warehouse remains normalized");
        Ok(Fetched::complete(records))
    }

    async fn supplier_stocks_page(
        &self,
        store: &StoreCredential,
        cursor: Cursor,
    ) -> MarketplaceResult<(Vec<StockRecord>, Option<Cursor>)> {
        let date_from = cursor.as_param().unwrap_or_else(|| FIRST_CHANGE_DATE.to_string());
        let request = self
            .request(
                Method::GET,
                &self.endpoints.statistics,
                "/api/v1/supplier/stocks",
                EndpointClass::Statistics,
                store,
            )
            .query("dateFrom", &date_from);

        let payload: Value = self.ctx.transport.send_json(&request).await?;

        let next = payload.as_array().and_then(|rows| {
            Cursor::next_watermark(
                rows,
                |row| row.get("lastChangeDate").and_then(Value::as_str).map(str::to_string),
                &cursor,
            )
        });

        let records = normalize_stock(&SUPPLIER_STOCKS, MarketplaceId::Wildberries, &store.store_id, &payload)?;
        Ok((records, next))
    }

    async fn stock_from_statistics(
        &self,
        store: &StoreCredential,
        query: &Query,
    ) -> MarketplaceResult<Fetched<StockRecord>> {
        let start = query
            .date_from
            .map(|d| d.format("%Y-%m-%dT00:00:00").to_string())
            .unwrap_or_else(|| FIRST_CHANGE_DATE.to_string());

        let paged = self
            .ctx
            .paginator
            .collect(Cursor::Watermark(start), move |cursor| async move {
                let (records, next) = self.supplier_stocks_page(store, cursor).await?;
                // Rows changed after the upper bound are filtered out below anyway
                Ok((records, next.filter(|next| !past_date_to(next, query.date_to))))
            })
            .await?;

        let records = paged.items.into_iter().filter(|r| query.matches_stock(r)).collect();
        Ok(Fetched {
            records,
            truncated: !paged.exhausted,
        })
    }

    /// One page of product cards
    async fn cards_page(
        &self,
        store: &StoreCredential,
        cursor: Cursor,
    ) -> MarketplaceResult<(Vec<Value>, Option<Cursor>)> {
        let after = match cursor.as_param() {
            Some(token) => Some(parse_card_token(&token)?),
            None => None,
        };
        let request = self
            .request(Method::POST, &self.endpoints.content, CARDS_PATH, EndpointClass::Content, store)
            .json_body(&CardsListRequest::page(CARDS_PAGE_LIMIT, after))?;

        let payload: Value = self.ctx.transport.send_json(&request).await?;
        let cards = rows(&payload, &["cards"], &[])?;

        // A short page is the last one
        let next = if cards.len() < CARDS_PAGE_LIMIT {
            None
        } else {
            let updated_at = lookup(&payload, "cursor.updatedAt").and_then(Value::as_str);
            let nm_id = lookup(&payload, "cursor.nmID").and_then(Value::as_u64);
            updated_at
                .zip(nm_id)
                .map(|(updated_at, nm_id)| Cursor::Token(format!("{}|{}", updated_at, nm_id)))
        };

        Ok((cards, next))
    }

    /// Card sizes keyed by `chrtID`, narrowed to the query's SKUs.
    ///
    /// The flag is set when the card listing stopped at the page bound.
    async fn card_sizes(
        &self,
        store: &StoreCredential,
        query: &Query,
    ) -> MarketplaceResult<(HashMap<u64, Value>, bool)> {
        let paged = self
            .ctx
            .paginator
            .collect(Cursor::Start, |cursor| self.cards_page(store, cursor))
            .await?;

        let sizes = rows(&Value::Array(paged.items), &[""], &["sizes"])?
            .into_iter()
            .filter(|size| {
                query.skus.is_empty()
                    || lookup(size, "vendorCode")
                        .and_then(Value::as_str)
                        .is_some_and(|code| query.skus.iter().any(|sku| sku == code))
            })
            .filter_map(|size| Some((lookup(&size, "chrtID")?.as_u64()?, size)))
            .collect();

        Ok((sizes, !paged.exhausted))
    }

    /// The seller's own warehouses as (id, name), narrowed to the query
    async fn seller_warehouses(
        &self,
        store: &StoreCredential,
        query: &Query,
    ) -> MarketplaceResult<Vec<(u64, String)>> {
        let request = self.request(
            Method::GET,
            &self.endpoints.marketplace,
            "/api/v3/warehouses",
            EndpointClass::General,
            store,
        );
        let payload: Value = self.ctx.transport.send_json(&request).await?;

        let warehouses = rows(&payload, &["", "data"], &[])?
            .iter()
            .filter_map(|row| {
                let id = lookup(row, "id")?.as_u64()?;
                let name = lookup(row, "name").and_then(Value::as_str).unwrap_or_default();
                Some((id, name.to_string()))
            })
            .filter(|(id, name)| {
                query.warehouses.is_empty()
                    || query
                        .warehouses
                        .iter()
                        .any(|w| *w == id.to_string() || w.eq_ignore_ascii_case(name))
            })
            .collect();

        Ok(warehouses)
    }

    async fn stock_from_seller_warehouses(
        &self,
        store: &StoreCredential,
        query: &Query,
    ) -> MarketplaceResult<Fetched<StockRecord>> {
        let warehouses = self.seller_warehouses(store, query).await?;
        if warehouses.is_empty() {
            debug!(store = %store.store_id, "No seller warehouses");
            return Ok(Fetched::complete(Vec::new()));
        }

        let (sizes, truncated) = self.card_sizes(store, query).await?;
        if sizes.is_empty() {
            warn!(store = %store.store_id, "No card sizes to ask seller warehouse stock for");
        }
        let mut chrt_ids: Vec<u64> = sizes.keys().copied().collect();
        chrt_ids.sort_unstable();

        let mut joined = Vec::new();
        for (warehouse_id, warehouse_name) in &warehouses {
            let path = format!("/api/v3/stocks/{}", warehouse_id);
            for chunk in chrt_ids.chunks(SELLER_STOCKS_CHUNK) {
                let request = self
                    .request(Method::POST, &self.endpoints.marketplace, &path, EndpointClass::General, store)
                    .json_body(&SellerStocksRequest { chrt_ids: chunk })?;
                let payload: Value = self.ctx.transport.send_json(&request).await?;

                for mut row in rows(&payload, &["stocks"], &[])? {
                    join_seller_stock(&mut row, &sizes, *warehouse_id, warehouse_name);
                    joined.push(row);
                }
            }
        }

        let records = normalize_stock(&SELLER_STOCKS, MarketplaceId::Wildberries, &store.store_id, &Value::Array(joined))?;
        let records: Vec<StockRecord> = records.into_iter().filter(|r| query.matches_stock(r)).collect();

        debug!(
            store = %store.store_id,
            warehouses = warehouses.len(),
            sizes = chrt_ids.len(),
            records = records.len(),
            "Seller warehouse stock fetched"
        );
        Ok(Fetched { records, truncated })
    }

    async fn prices_page(
        &self,
        store: &StoreCredential,
        cursor: Cursor,
        page_size: usize,
    ) -> MarketplaceResult<(Vec<PriceRecord>, Option<Cursor>)> {
        let offset = cursor.offset();
        let request = self
            .request(
                Method::GET,
                &self.endpoints.prices,
                "/api/v2/list/goods/filter",
                EndpointClass::Prices,
                store,
            )
            .query("limit", page_size)
            .query("offset", offset);

        let payload: Value = self.ctx.transport.send_json(&request).await?;
        let records = normalize_prices(&GOODS_PRICES, MarketplaceId::Wildberries, &store.store_id, &payload)?;
        let next = Cursor::next_offset(offset, records.len(), page_size);

        Ok((records, next))
    }
}

/// Whether a watermark lies past the end of `date_to`
fn past_date_to(cursor: &Cursor, date_to: Option<NaiveDate>) -> bool {
    let mark = cursor.as_param().as_deref().and_then(parse_timestamp);
    match (mark, date_to) {
        (Some(mark), Some(date_to)) => mark.date_naive() > date_to,
        _ => false,
    }
}

/// `updatedAt|nmID` token of the card listing
fn parse_card_token(token: &str) -> MarketplaceResult<(String, u64)> {
    token
        .rsplit_once('|')
        .and_then(|(updated_at, nm_id)| Some((updated_at.to_string(), nm_id.parse().ok()?)))
        .ok_or_else(|| MarketplaceError::parse("malformed card cursor", token))
}

/// Copy card and warehouse fields onto one seller-warehouse stock row
fn join_seller_stock(row: &mut Value, sizes: &HashMap<u64, Value>, warehouse_id: u64, warehouse_name: &str) {
    let size = lookup(row, "chrtId").and_then(Value::as_u64).and_then(|id| sizes.get(&id));
    let Value::Object(fields) = row else {
        return;
    };

    if let Some(size) = size {
        for key in ["vendorCode", "nmID", "brand", "subjectName", "techSize"] {
            if let Some(value) = size.get(key) {
                fields.entry(key).or_insert_with(|| value.clone());
            }
        }
        if let Some(barcode) = lookup(size, "skus.0") {
            fields.entry("barcode").or_insert_with(|| barcode.clone());
        }
    }
    fields.insert("warehouseId".to_string(), Value::String(warehouse_id.to_string()));
    fields.insert("warehouseName".to_string(), Value::String(warehouse_name.to_string()));
}

#[async_trait]
impl MarketplaceClient for WildberriesClient {
    fn marketplace(&self) -> MarketplaceId {
        MarketplaceId::Wildberries
    }

    fn name(&self) -> &'static str {
        "Wildberries"
    }

    fn stock_sources(&self) -> &'static [SourceKind] {
        &[SourceKind::Report, SourceKind::Paginated]
    }

    fn seller_stock_sources(&self) -> &'static [SourceKind] {
        &[SourceKind::SellerWarehouses]
    }

    async fn fetch_stock_from(
        &self,
        source: SourceKind,
        store: &StoreCredential,
        query: &Query,
    ) -> MarketplaceResult<Fetched<StockRecord>> {
        match source {
            SourceKind::Report => self.stock_from_report(store, query).await,
            SourceKind::Paginated => self.stock_from_statistics(store, query).await,
            SourceKind::SellerWarehouses => self.stock_from_seller_warehouses(store, query).await,
        }
    }

    async fn fetch_prices(
        &self,
        store: &StoreCredential,
        query: &Query,
    ) -> MarketplaceResult<Fetched<PriceRecord>> {
        let page_size = self.ctx.settings.pagination.page_size.clamp(1, 1000);

        let paged = self
            .ctx
            .paginator
            .collect(Cursor::Offset(0), |cursor| self.prices_page(store, cursor, page_size))
            .await?;

        let records = paged.items.into_iter().filter(|r| query.matches_price(r)).collect();
        Ok(Fetched {
            records,
            truncated: !paged.exhausted,
        })
    }
}

#[async_trait]
impl ReportApi for WildberriesClient {
    fn marketplace(&self) -> MarketplaceId {
        MarketplaceId::Wildberries
    }

    fn profile(&self) -> &ReportProfile {
        &REMAINS_REPORT
    }

    async fn submit(&self, store: &StoreCredential, _query: &Query) -> MarketplaceResult<Value> {
        let mut request = self.request(
            Method::GET,
            &self.endpoints.analytics,
            REMAINS_PATH,
            EndpointClass::ReportSubmit,
            store,
        );
        for group in ["groupByBrand", "groupBySubject", "groupBySa", "groupByNm", "groupByBarcode", "groupBySize"] {
            request = request.query(group, "true");
        }

        self.ctx.transport.send_json(&request.query("locale", "ru")).await
    }

    async fn poll(&self, store: &StoreCredential, job_id: &str) -> MarketplaceResult<Value> {
        let path = format!("{}/tasks/{}/status", REMAINS_PATH, job_id);
        let request = self.request(Method::GET, &self.endpoints.analytics, &path, EndpointClass::ReportPoll, store);
        self.ctx.transport.send_json(&request).await
    }

    async fn download(&self, store: &StoreCredential, handle: &ResultHandle) -> MarketplaceResult<Bytes> {
        let request = match handle {
            ResultHandle::JobId(job_id) => {
                let path = format!("{}/tasks/{}/download", REMAINS_PATH, job_id);
                self.request(Method::GET, &self.endpoints.analytics, &path, EndpointClass::ReportDownload, store)
            }
            ResultHandle::Url(url) => ApiRequest::get(
                url.clone(),
                RateKey::new(MarketplaceId::Wildberries, EndpointClass::ReportDownload),
            )
            .header("Authorization", &store.api_key),
            ResultHandle::Inline(payload) => return Ok(payload.body.clone()),
        };

        self.ctx.transport.send_raw(&request).await
    }
}
