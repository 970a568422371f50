//! Wildberries Adapter Module
//!
//! Stock comes from the warehouse-remains report (analytics API), with the
//! statistics API stock listing as fallback. Stock in the seller's own
//! warehouses (FBS) is read per warehouse from the marketplace API, keyed
//! by the size ids of the seller's product cards. Prices come from the
//! discounts-prices API.
//!
//! API Documentation: https://dev.wildberries.ru/openapi/

mod client;
mod models;
mod schemas;

pub use client::WildberriesClient;
