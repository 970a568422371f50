//! Marketplace Access
//!
//! Fetches stock for every configured store and writes the canonical
//! records to stdout, one JSON object per line.
//!
//! Stores are listed in `MPACCESS_STORES` as `store_id:marketplace` pairs
//! separated by commas; credentials are read from `<STORE>_API_KEY` and
//! friends.

use std::io::Write;

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};

use marketplace_access::{AccessLayer, MarketplaceId, Query, Settings, StoreCredential};

fn parse_stores(raw: &str) -> Result<Vec<StoreCredential>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (store_id, code) = entry
                .split_once(':')
                .with_context(|| format!("expected store_id:marketplace, got '{}'", entry))?;
            let marketplace = MarketplaceId::from_code(code)
                .with_context(|| format!("unknown marketplace '{}' for store '{}'", code, store_id))?;
            Ok(StoreCredential::from_env(store_id.trim(), marketplace))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing subscriber for structured logging (stderr, stdout carries records)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("marketplace_access=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let settings = Settings::load().context("Failed to load configuration")?;

    let stores = parse_stores(&std::env::var("MPACCESS_STORES").unwrap_or_default())?;
    if stores.is_empty() {
        bail!("MPACCESS_STORES is empty; expected e.g. 'wb-main:wildberries,ozon-main:ozon'");
    }

    info!(
        "Starting marketplace-access v{} for {} stores",
        env!("CARGO_PKG_VERSION"),
        stores.len()
    );

    let layer = AccessLayer::new(settings)?;
    let results = layer.fetch_fleet(&stores, &Query::all()).await;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut failed = 0usize;

    for outcome in results {
        match outcome.result {
            Ok(batch) => {
                if batch.provenance.truncated {
                    warn!(store = %outcome.store_id, "Listing truncated at the page bound");
                }
                for record in batch.records.iter() {
                    serde_json::to_writer(&mut out, record)?;
                    out.write_all(b"\n")?;
                }
                info!(
                    store = %outcome.store_id,
                    marketplace = %outcome.marketplace,
                    records = batch.len(),
                    source = %batch.provenance.source,
                    stale = batch.provenance.stale,
                    "Store done"
                );
            }
            Err(e) => {
                failed += 1;
                error!(store = %outcome.store_id, marketplace = %outcome.marketplace, error = %e, "Store failed");
            }
        }
    }
    out.flush()?;

    if failed == stores.len() {
        bail!("all {} stores failed", failed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stores() {
        let stores = parse_stores(" wb-main:wildberries , ozon-1:ozon,,ym:ym ").unwrap();
        let ids: Vec<_> = stores.iter().map(|s| (s.store_id.as_str(), s.marketplace)).collect();
        assert_eq!(
            ids,
            vec![
                ("wb-main", MarketplaceId::Wildberries),
                ("ozon-1", MarketplaceId::Ozon),
                ("ym", MarketplaceId::YandexMarket),
            ]
        );
    }

    #[test]
    fn test_parse_stores_rejects_garbage() {
        assert!(parse_stores("wb-main").is_err());
        assert!(parse_stores("shop:amazon").is_err());
        assert!(parse_stores("").unwrap().is_empty());
    }
}
