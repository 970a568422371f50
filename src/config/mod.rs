//! Configuration module for the marketplace access layer
//!
//! All tuning (timeouts, retry budget, per-endpoint cadence, cache ttl) lives
//! in one explicit [`Settings`] value that is handed to constructors.

use serde::Deserialize;
use config::{Config, ConfigError, Environment, File};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::domain::MarketplaceId;
use crate::providers::EndpointClass;

/// Main application settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub http: HttpSettings,
    pub retry: RetrySettings,
    pub rate_limits: RateLimitSettings,
    pub reports: ReportSettings,
    pub pagination: PaginationSettings,
    pub cache: CacheSettings,
    pub endpoints: EndpointSettings,
    pub fleet: FleetSettings,
}

/// HTTP client configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub pool_max_idle_per_host: usize,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        HttpSettings {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            pool_max_idle_per_host: 10,
            user_agent: "marketplace-access/1.0".to_string(),
        }
    }
}

/// Retry budget for rate-limited and transient failures
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_retries: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

/// Minimum interval between requests per marketplace and endpoint class
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Used for classes a marketplace table does not list
    pub default_interval_ms: u64,
    pub wildberries: HashMap<EndpointClass, u64>,
    pub ozon: HashMap<EndpointClass, u64>,
    pub yandex_market: HashMap<EndpointClass, u64>,
}

impl RateLimitSettings {
    /// Configured minimum interval; zero means unlimited
    pub fn interval(&self, marketplace: MarketplaceId, class: EndpointClass) -> Duration {
        let table = match marketplace {
            MarketplaceId::Wildberries => &self.wildberries,
            MarketplaceId::Ozon => &self.ozon,
            MarketplaceId::YandexMarket => &self.yandex_market,
        };
        let ms = table.get(&class).copied().unwrap_or(self.default_interval_ms);
        Duration::from_millis(ms)
    }

    /// Same interval for every class of every marketplace
    pub fn uniform(interval_ms: u64) -> Self {
        RateLimitSettings {
            default_interval_ms: interval_ms,
            wildberries: HashMap::new(),
            ozon: HashMap::new(),
            yandex_market: HashMap::new(),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        use EndpointClass::*;

        let wildberries = HashMap::from([
            (General, 200),
            (Content, 600),
            (Statistics, 60_000),
            (Analytics, 20_000),
            (Prices, 600),
            (ReportSubmit, 60_000),
            (ReportPoll, 5_000),
            (ReportDownload, 60_000),
        ]);
        let ozon = HashMap::from([
            (General, 100),
            (Prices, 100),
            (ReportSubmit, 1_000),
            (ReportPoll, 1_000),
            (ReportDownload, 0),
        ]);
        let yandex_market = HashMap::from([
            (General, 300),
            (Prices, 300),
            (ReportSubmit, 1_000),
            (ReportPoll, 1_000),
            (ReportDownload, 0),
        ]);

        RateLimitSettings {
            default_interval_ms: 200,
            wildberries,
            ozon,
            yandex_market,
        }
    }
}

/// Async report polling
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
}

impl ReportSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ReportSettings {
    fn default() -> Self {
        ReportSettings {
            poll_interval_secs: 5,
            timeout_secs: 300,
        }
    }
}

/// Pagination safety bound
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaginationSettings {
    pub max_pages: usize,
    pub page_size: usize,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        PaginationSettings {
            max_pages: 100,
            page_size: 1000,
        }
    }
}

/// Result cache
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    /// Serve an expired entry (flagged stale) when a refresh fails
    pub serve_stale: bool,
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            ttl_secs: 300,
            serve_stale: false,
        }
    }
}

/// Base URLs per marketplace. Override for sandboxes and tests.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EndpointSettings {
    pub wildberries: WildberriesEndpoints,
    pub ozon: OzonEndpoints,
    pub yandex_market: YandexMarketEndpoints,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WildberriesEndpoints {
    pub statistics: String,
    pub analytics: String,
    pub prices: String,
    /// Seller warehouses (FBS)
    pub marketplace: String,
    /// Product cards
    pub content: String,
}

impl Default for WildberriesEndpoints {
    fn default() -> Self {
        WildberriesEndpoints {
            statistics: "https://statistics-api.wildberries.ru".to_string(),
            analytics: "https://seller-analytics-api.wildberries.ru".to_string(),
            prices: "https://discounts-prices-api.wildberries.ru".to_string(),
            marketplace: "https://marketplace-api.wildberries.ru".to_string(),
            content: "https://content-api.wildberries.ru".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OzonEndpoints {
    pub seller: String,
}

impl Default for OzonEndpoints {
    fn default() -> Self {
        OzonEndpoints {
            seller: "https://api-seller.ozon.ru".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct YandexMarketEndpoints {
    pub partner: String,
}

impl Default for YandexMarketEndpoints {
    fn default() -> Self {
        YandexMarketEndpoints {
            partner: "https://api.partner.market.yandex.ru".to_string(),
        }
    }
}

/// Multi-store fetches
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FleetSettings {
    pub concurrency: usize,
    /// Per-store deadline; no deadline when unset
    pub deadline_secs: Option<u64>,
}

impl FleetSettings {
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

impl Default for FleetSettings {
    fn default() -> Self {
        FleetSettings {
            concurrency: 4,
            deadline_secs: None,
        }
    }
}

impl Settings {
    /// Load configuration from files and environment variables
    ///
    /// Configuration priority (highest to lowest):
    /// 1. Environment variables (prefixed with MPACCESS_)
    /// 2. config/local.toml (gitignored)
    /// 3. config/default.toml
    pub fn load() -> Result<Self, ConfigError> {
        let config_dir = std::env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"));

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            // MPACCESS_RETRY__MAX_RETRIES, MPACCESS_CACHE__TTL_SECS, etc.
            .add_source(
                Environment::with_prefix("MPACCESS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject base URLs that cannot be joined with request paths
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoints = &self.endpoints;
        let bases = [
            ("endpoints.wildberries.statistics", &endpoints.wildberries.statistics),
            ("endpoints.wildberries.analytics", &endpoints.wildberries.analytics),
            ("endpoints.wildberries.prices", &endpoints.wildberries.prices),
            ("endpoints.wildberries.marketplace", &endpoints.wildberries.marketplace),
            ("endpoints.wildberries.content", &endpoints.wildberries.content),
            ("endpoints.ozon.seller", &endpoints.ozon.seller),
            ("endpoints.yandex_market.partner", &endpoints.yandex_market.partner),
        ];

        for (name, base) in bases {
            let parsed = Url::parse(base)
                .map_err(|e| ConfigError::Message(format!("{}: invalid URL '{}': {}", name, base, e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::Message(format!("{}: unsupported scheme '{}'", name, parsed.scheme())));
            }
        }

        if self.fleet.concurrency == 0 {
            return Err(ConfigError::Message("fleet.concurrency must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_statistics_interval() {
        let limits = RateLimitSettings::default();
        assert_eq!(
            limits.interval(MarketplaceId::Wildberries, EndpointClass::Statistics),
            Duration::from_secs(60)
        );
        assert_eq!(
            limits.interval(MarketplaceId::Ozon, EndpointClass::ReportDownload),
            Duration::ZERO
        );
    }

    #[test]
    fn test_unlisted_class_uses_default() {
        let limits = RateLimitSettings::default();
        assert_eq!(
            limits.interval(MarketplaceId::Ozon, EndpointClass::Statistics),
            Duration::from_millis(200)
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings: Settings = Config::builder()
            .add_source(config::File::from_str(
                "[retry]\nmax_retries = 2\n\n[rate_limits.wildberries]\nstatistics = 1000\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.retry.max_retries, 2);
        assert_eq!(settings.retry.base_delay_ms, 500);
        assert_eq!(
            settings.rate_limits.interval(MarketplaceId::Wildberries, EndpointClass::Statistics),
            Duration::from_secs(1)
        );
        assert_eq!(settings.cache.ttl_secs, 300);
    }

    #[test]
    fn test_validate_endpoints() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_ok());

        settings.endpoints.ozon.seller = "api-seller.ozon.ru".to_string();
        assert!(settings.validate().is_err());

        settings.endpoints.ozon.seller = "ftp://api-seller.ozon.ru".to_string();
        assert!(settings.validate().is_err());

        settings.endpoints.ozon.seller = "http://127.0.0.1:8080".to_string();
        settings.fleet.concurrency = 0;
        assert!(settings.validate().is_err());
    }
}
