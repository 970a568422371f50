//! Marketplace access facade
//!
//! [`AccessLayer`] is the single entry point for callers. Per request it
//! checks the cache, tries the marketplace's preferred stock source, falls
//! back to the next one on failure and caches whatever succeeds. When every
//! source fails the caller gets one error naming each source and its cause.
//!
//! Stock in the seller's own warehouses is a separate dataset with its own
//! sources and cache entries ([`AccessLayer::fetch_seller_stock`]).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{info, instrument, warn};

use crate::cache::{CacheKey, CacheStats, Dataset, RecordCache, StalePolicy};
use crate::config::Settings;
use crate::domain::{MarketplaceId, PriceRecord, Query, RecordBatch, SourceKind, StockRecord, StoreCredential};
use crate::providers::http_client::{HttpBackend, ReqwestBackend, ResilientTransport};
use crate::providers::paginator::Paginator;
use crate::providers::rate_governor::RateGovernor;
use crate::providers::report::ReportDriver;
use crate::providers::traits::{
    ClientFactory, MarketplaceClient, MarketplaceError, MarketplaceResult, SourceFailure,
};

// ============================================================================
// Shared context
// ============================================================================

/// Components shared by every adapter of one access layer
#[derive(Clone)]
pub struct ClientContext {
    pub transport: Arc<ResilientTransport>,
    pub paginator: Paginator,
    pub reports: ReportDriver,
    pub settings: Arc<Settings>,
}

impl ClientContext {
    pub fn new(settings: Arc<Settings>, backend: Arc<dyn HttpBackend>) -> Self {
        let governor = Arc::new(RateGovernor::new(settings.rate_limits.clone()));
        let transport = Arc::new(ResilientTransport::new(backend, governor, settings.retry.clone()));

        ClientContext {
            transport,
            paginator: Paginator::from_settings(&settings.pagination),
            reports: ReportDriver::from_settings(&settings.reports),
            settings,
        }
    }
}

// ============================================================================
// Fleet results
// ============================================================================

/// Outcome for one store of a fleet fetch
#[derive(Debug)]
pub struct FleetResult {
    pub marketplace: MarketplaceId,
    pub store_id: String,
    pub result: MarketplaceResult<RecordBatch<StockRecord>>,
}

// ============================================================================
// Access layer
// ============================================================================

pub struct AccessLayer {
    clients: HashMap<MarketplaceId, Arc<dyn MarketplaceClient>>,
    stock_cache: RecordCache<RecordBatch<StockRecord>>,
    price_cache: RecordCache<RecordBatch<PriceRecord>>,
    settings: Arc<Settings>,
}

impl AccessLayer {
    /// Build an access layer talking to the real marketplace APIs
    pub fn new(settings: Settings) -> MarketplaceResult<Self> {
        let backend = Arc::new(ReqwestBackend::new(&settings.http)?);
        Ok(Self::with_backend(settings, backend))
    }

    /// Build an access layer on a custom HTTP backend
    pub fn with_backend(settings: Settings, backend: Arc<dyn HttpBackend>) -> Self {
        let settings = Arc::new(settings);
        let ctx = ClientContext::new(settings.clone(), backend);
        let clients = MarketplaceId::ALL
            .iter()
            .map(|&marketplace| (marketplace, ClientFactory::create(marketplace, ctx.clone())))
            .collect();

        Self::assemble(settings, clients)
    }

    /// Build an access layer from ready-made adapters
    pub fn with_clients(settings: Settings, clients: Vec<Arc<dyn MarketplaceClient>>) -> Self {
        let clients = clients.into_iter().map(|c| (c.marketplace(), c)).collect();
        Self::assemble(Arc::new(settings), clients)
    }

    fn assemble(settings: Arc<Settings>, clients: HashMap<MarketplaceId, Arc<dyn MarketplaceClient>>) -> Self {
        AccessLayer {
            clients,
            stock_cache: RecordCache::new(),
            price_cache: RecordCache::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn default_policy(&self) -> StalePolicy {
        if self.settings.cache.serve_stale {
            StalePolicy::ServeStale
        } else {
            StalePolicy::Propagate
        }
    }

    fn client(&self, store: &StoreCredential) -> MarketplaceResult<Arc<dyn MarketplaceClient>> {
        if !store.is_configured() {
            return Err(MarketplaceError::NotConfigured(format!(
                "{} store '{}' has no API key",
                store.marketplace, store.store_id
            )));
        }
        self.clients
            .get(&store.marketplace)
            .cloned()
            .ok_or_else(|| MarketplaceError::NotConfigured(format!("no adapter for {}", store.marketplace)))
    }

    /// Stock for one store, using the configured stale policy
    pub async fn fetch_stock(
        &self,
        store: &StoreCredential,
        query: &Query,
    ) -> MarketplaceResult<RecordBatch<StockRecord>> {
        self.fetch_stock_with(store, query, self.default_policy()).await
    }

    /// Stock for one store with an explicit stale policy
    #[instrument(skip_all, fields(marketplace = %store.marketplace, store = %store.store_id))]
    pub async fn fetch_stock_with(
        &self,
        store: &StoreCredential,
        query: &Query,
        policy: StalePolicy,
    ) -> MarketplaceResult<RecordBatch<StockRecord>> {
        let client = self.client(store)?;
        let key = CacheKey::new(store.marketplace, &store.store_id, Dataset::Stock, query.signature());
        let (store, query) = (store.clone(), query.clone());

        let cached = self
            .stock_cache
            .get_or_fetch(&key, self.settings.cache.ttl(), policy, move || async move {
                let sources = client.stock_sources();
                fetch_stock_with_fallback(client, sources, store, query).await
            })
            .await?;

        Ok(if cached.stale { cached.value.into_stale() } else { cached.value })
    }

    /// Stock for one store, abandoned when `deadline` elapses
    pub async fn fetch_stock_within(
        &self,
        store: &StoreCredential,
        query: &Query,
        deadline: Duration,
    ) -> MarketplaceResult<RecordBatch<StockRecord>> {
        tokio::time::timeout(deadline, self.fetch_stock(store, query))
            .await
            .map_err(|_| {
                warn!(
                    marketplace = %store.marketplace,
                    store = %store.store_id,
                    deadline_ms = deadline.as_millis() as u64,
                    "Stock fetch deadline exceeded"
                );
                MarketplaceError::TimedOut {
                    operation: format!("stock fetch for {}", store.store_id),
                    elapsed: deadline,
                }
            })?
    }

    /// Stock held in the seller's own warehouses (FBS), for marketplaces
    /// that report it apart from their own warehouses
    #[instrument(skip_all, fields(marketplace = %store.marketplace, store = %store.store_id))]
    pub async fn fetch_seller_stock(
        &self,
        store: &StoreCredential,
        query: &Query,
    ) -> MarketplaceResult<RecordBatch<StockRecord>> {
        let client = self.client(store)?;
        let sources = client.seller_stock_sources();
        if sources.is_empty() {
            return Err(MarketplaceError::unsupported_source(
                client.name(),
                SourceKind::SellerWarehouses,
            ));
        }

        let key = CacheKey::new(store.marketplace, &store.store_id, Dataset::SellerStock, query.signature());
        let (store, query) = (store.clone(), query.clone());

        let cached = self
            .stock_cache
            .get_or_fetch(&key, self.settings.cache.ttl(), self.default_policy(), move || async move {
                fetch_stock_with_fallback(client, sources, store, query).await
            })
            .await?;

        Ok(if cached.stale { cached.value.into_stale() } else { cached.value })
    }

    /// Current prices for one store
    #[instrument(skip_all, fields(marketplace = %store.marketplace, store = %store.store_id))]
    pub async fn fetch_prices(
        &self,
        store: &StoreCredential,
        query: &Query,
    ) -> MarketplaceResult<RecordBatch<PriceRecord>> {
        let client = self.client(store)?;
        let key = CacheKey::new(store.marketplace, &store.store_id, Dataset::Prices, query.signature());
        let (store, query) = (store.clone(), query.clone());

        let cached = self
            .price_cache
            .get_or_fetch(&key, self.settings.cache.ttl(), self.default_policy(), move || async move {
                let fetched = client.fetch_prices(&store, &query).await?;
                Ok(RecordBatch::new(fetched.records, SourceKind::Paginated, fetched.truncated))
            })
            .await?;

        Ok(if cached.stale { cached.value.into_stale() } else { cached.value })
    }

    /// Stock for many stores with bounded concurrency.
    ///
    /// Results come back in completion order, one per store.
    #[instrument(skip_all, fields(stores = stores.len()))]
    pub async fn fetch_fleet(&self, stores: &[StoreCredential], query: &Query) -> Vec<FleetResult> {
        let deadline = self.settings.fleet.deadline();
        let concurrency = self.settings.fleet.concurrency.max(1);

        let results: Vec<FleetResult> = futures::stream::iter(stores)
            .map(|store| async move {
                let result = match deadline {
                    Some(deadline) => self.fetch_stock_within(store, query, deadline).await,
                    None => self.fetch_stock(store, query).await,
                };
                FleetResult {
                    marketplace: store.marketplace,
                    store_id: store.store_id.clone(),
                    result,
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let failed = results.iter().filter(|r| r.result.is_err()).count();
        info!(stores = results.len(), failed, "Fleet fetch finished");
        results
    }

    /// Drop every cached batch of one store
    pub fn invalidate(&self, store: &StoreCredential) -> usize {
        self.stock_cache.invalidate_store(store.marketplace, &store.store_id)
            + self.price_cache.invalidate_store(store.marketplace, &store.store_id)
    }

    /// Remove expired cache entries
    pub fn purge_expired(&self) -> usize {
        self.stock_cache.purge_expired() + self.price_cache.purge_expired()
    }

    pub fn cache_stats(&self) -> CacheStats {
        let stock = self.stock_cache.stats();
        let prices = self.price_cache.stats();
        CacheStats {
            entries: stock.entries + prices.entries,
            fresh: stock.fresh + prices.fresh,
            expired: stock.expired + prices.expired,
            in_flight: stock.in_flight + prices.in_flight,
        }
    }
}

/// Try each stock source in preference order
async fn fetch_stock_with_fallback(
    client: Arc<dyn MarketplaceClient>,
    sources: &'static [SourceKind],
    store: StoreCredential,
    query: Query,
) -> MarketplaceResult<RecordBatch<StockRecord>> {
    let mut failures: Vec<SourceFailure> = Vec::new();

    for &source in sources {
        match client.fetch_stock_from(source, &store, &query).await {
            Ok(fetched) => {
                if !failures.is_empty() {
                    info!(
                        marketplace = %store.marketplace,
                        store = %store.store_id,
                        source = %source,
                        "Fallback source succeeded"
                    );
                }
                if fetched.truncated {
                    warn!(store = %store.store_id, source = %source, "Stock listing truncated at page bound");
                }
                return Ok(RecordBatch::new(fetched.records, source, fetched.truncated));
            }
            Err(error) => {
                warn!(
                    marketplace = %store.marketplace,
                    store = %store.store_id,
                    source = %source,
                    error = %error,
                    "Stock source failed"
                );
                failures.push(SourceFailure {
                    source,
                    error: Box::new(error),
                });
            }
        }
    }

    match failures.len() {
        0 => Err(MarketplaceError::NotConfigured(format!(
            "{} has no stock source",
            client.name()
        ))),
        1 => Err(*failures.remove(0).error),
        _ => Err(MarketplaceError::AllSourcesFailed { failures }),
    }
}
