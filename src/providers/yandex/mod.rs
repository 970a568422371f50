//! Yandex Market Adapter Module
//!
//! Stock comes from the stocks-on-warehouses report (CSV), with the
//! campaign offer stocks listing as fallback. Prices come from the campaign
//! offer prices listing. Every call is scoped to a campaign.
//!
//! API Documentation: https://yandex.ru/dev/market/partner-api/doc/

mod client;
mod models;
mod schemas;

pub use client::YandexMarketClient;
