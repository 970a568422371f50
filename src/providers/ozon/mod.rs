//! Ozon Adapter Module
//!
//! Stock comes from the warehouse stock report (CSV), with the v4 product
//! stocks listing as fallback. Prices come from the v5 prices listing.
//! Every call is a POST with a JSON body.
//!
//! API Documentation: https://docs.ozon.ru/api/seller/

mod client;
mod models;
mod schemas;

pub use client::OzonClient;
