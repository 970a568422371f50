//! Marketplace trait definitions
//!
//! This module defines the error taxonomy and the contract every marketplace
//! adapter implements. Each adapter (Wildberries, Ozon, Yandex Market)
//! implements [`MarketplaceClient`] so the facade can drive them uniformly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{MarketplaceId, PriceRecord, Query, SourceKind, StockRecord, StoreCredential};
use super::facade::ClientContext;

// ============================================================================
// Error Types
// ============================================================================

/// Longest payload fragment attached to an error
const FRAGMENT_LIMIT: usize = 500;

/// Marketplace access errors
///
/// `Clone` so a single in-flight fetch outcome can be handed to every caller
/// waiting on it.
#[derive(Debug, Clone, Error)]
pub enum MarketplaceError {
    #[error("Rate limited after {attempts} attempts: {body}")]
    RateLimited { attempts: u32, body: String },

    #[error("Transient failure after {attempts} attempts: {message}")]
    Transient { attempts: u32, message: String },

    #[error("Client error: {status} - {body}")]
    ClientError { status: u16, body: String },

    #[error("Server fault after {attempts} attempts: {status} - {body}")]
    ServerFault { status: u16, attempts: u32, body: String },

    #[error("Request timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("Report submission rejected: {0}")]
    SubmissionError(String),

    #[error("Report {job_id} failed with status '{status}'")]
    ReportFailed { job_id: String, status: String },

    #[error("{operation} timed out after {elapsed:?}")]
    TimedOut { operation: String, elapsed: Duration },

    #[error("Parse error: {message} - fragment: {fragment}")]
    ParseError { message: String, fragment: String },

    #[error("Store not configured: {0}")]
    NotConfigured(String),

    #[error("All sources failed: {}", describe_failures(.failures))]
    AllSourcesFailed { failures: Vec<SourceFailure> },
}

/// One failed source inside [`MarketplaceError::AllSourcesFailed`]
#[derive(Debug, Clone)]
pub struct SourceFailure {
    pub source: SourceKind,
    pub error: Box<MarketplaceError>,
}

fn describe_failures(failures: &[SourceFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("[{}] {}", f.source, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

impl MarketplaceError {
    /// Whether the transport may retry this failure
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MarketplaceError::RateLimited { .. }
                | MarketplaceError::Transient { .. }
                | MarketplaceError::ServerFault { .. }
                | MarketplaceError::Timeout { .. }
        )
    }

    /// Build a parse error, keeping at most 500 characters of the payload
    pub fn parse(message: impl Into<String>, payload: &str) -> Self {
        MarketplaceError::ParseError {
            message: message.into(),
            fragment: fragment(payload),
        }
    }

    /// A stock source the adapter does not offer
    pub fn unsupported_source(client: &str, source: SourceKind) -> Self {
        MarketplaceError::NotConfigured(format!("{} has no {} stock source", client, source))
    }
}

/// Truncate a payload for diagnostics (char-boundary safe)
pub(crate) fn fragment(payload: &str) -> String {
    if payload.chars().count() <= FRAGMENT_LIMIT {
        payload.to_string()
    } else {
        let head: String = payload.chars().take(FRAGMENT_LIMIT).collect();
        format!("{}...", head)
    }
}

/// Result type for marketplace operations
pub type MarketplaceResult<T> = Result<T, MarketplaceError>;

// ============================================================================
// Fetch results
// ============================================================================

/// Records from one source, before caching
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub records: Vec<T>,
    /// The page bound stopped pagination before the upstream ran dry
    pub truncated: bool,
}

impl<T> Fetched<T> {
    pub fn complete(records: Vec<T>) -> Self {
        Fetched { records, truncated: false }
    }
}

// ============================================================================
// Client Trait
// ============================================================================

/// Marketplace adapter trait
///
/// Adapters only know how to talk to their marketplace; caching, fallback
/// and deadlines are applied by the facade.
#[async_trait]
pub trait MarketplaceClient: Send + Sync {
    fn marketplace(&self) -> MarketplaceId;

    /// Display name (e.g., "Wildberries")
    fn name(&self) -> &'static str;

    /// Stock sources in preference order
    fn stock_sources(&self) -> &'static [SourceKind];

    /// Sources for stock held in the seller's own warehouses, if the
    /// marketplace exposes it separately
    fn seller_stock_sources(&self) -> &'static [SourceKind] {
        &[]
    }

    /// Fetch stock from one specific source
    async fn fetch_stock_from(
        &self,
        source: SourceKind,
        store: &StoreCredential,
        query: &Query,
    ) -> MarketplaceResult<Fetched<StockRecord>>;

    /// Fetch current prices
    async fn fetch_prices(
        &self,
        store: &StoreCredential,
        query: &Query,
    ) -> MarketplaceResult<Fetched<PriceRecord>>;
}

// ============================================================================
// Client Factory
// ============================================================================

/// Creates marketplace adapters sharing one transport
pub struct ClientFactory;

impl ClientFactory {
    pub fn create(marketplace: MarketplaceId, ctx: ClientContext) -> Arc<dyn MarketplaceClient> {
        match marketplace {
            MarketplaceId::Wildberries => Arc::new(super::wildberries::WildberriesClient::new(ctx)),
            MarketplaceId::Ozon => Arc::new(super::ozon::OzonClient::new(ctx)),
            MarketplaceId::YandexMarket => Arc::new(super::yandex::YandexMarketClient::new(ctx)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(MarketplaceError::RateLimited { attempts: 1, body: String::new() }.is_retryable());
        assert!(MarketplaceError::Timeout { attempts: 1 }.is_retryable());
        assert!(!MarketplaceError::ClientError { status: 400, body: String::new() }.is_retryable());
        assert!(!MarketplaceError::parse("bad", "{}").is_retryable());
        assert!(!MarketplaceError::SubmissionError("x".into()).is_retryable());
    }

    #[test]
    fn test_fragment_is_capped() {
        let long = "ж".repeat(2_000);
        match MarketplaceError::parse("too long", &long) {
            MarketplaceError::ParseError { fragment, .. } => {
                assert_eq!(fragment.chars().count(), 503);
                assert!(fragment.ends_with("..."));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_aggregated_error_lists_every_source() {
        let err = MarketplaceError::AllSourcesFailed {
            failures: vec![
                SourceFailure {
                    source: SourceKind::Report,
                    error: Box::new(MarketplaceError::SubmissionError("no taskId".into())),
                },
                SourceFailure {
                    source: SourceKind::Paginated,
                    error: Box::new(MarketplaceError::ClientError { status: 401, body: "unauthorized".into() }),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("[report] Report submission rejected: no taskId"));
        assert!(text.contains("[paginated] Client error: 401 - unauthorized"));
    }
}
