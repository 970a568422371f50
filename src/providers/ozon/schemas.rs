//! Ozon payload layouts

use crate::providers::normalizer::{Alias, PayloadFormat, PriceSchema, StockSchema, UNMAPPED};
use crate::providers::report::{ReportProfile, StatusVocabulary};

/// `/v1/report/warehouse/stock` + `/v1/report/info`
pub const STOCK_REPORT: ReportProfile = ReportProfile {
    job_id: &["result.code", "code"],
    status: &["result.status", "status"],
    file: &["result.file", "file"],
    inline: &[],
    format: PayloadFormat::Csv,
    vocabulary: StatusVocabulary::STANDARD,
};

/// Warehouse stock report columns
pub const REPORT_STOCK: StockSchema = StockSchema {
    rows: &[""],
    explode: &[],
    sku: &[Alias::Path("Артикул"), Alias::Path("Артикул продавца")],
    item_id: &[Alias::Path("SKU"), Alias::Path("Ozon SKU ID"), Alias::Path("FBO OZON SKU ID")],
    barcode: &[Alias::Path("Штрихкод"), Alias::Path("Barcode")],
    warehouse_id: &[Alias::Path("ID склада")],
    warehouse_name: &[Alias::Path("Склад"), Alias::Path("Название склада")],
    quantity: &[
        Alias::Path("Доступно к продаже"),
        Alias::Path("Доступно на складе, шт"),
        Alias::Path("Доступно"),
    ],
    reserved: &[Alias::Path("Зарезервировано"), Alias::Path("Зарезервировано, шт")],
    in_way_to_client: UNMAPPED,
    in_way_from_client: UNMAPPED,
    price: UNMAPPED,
    discount: UNMAPPED,
    category: &[Alias::Path("Категория")],
    brand: &[Alias::Path("Бренд")],
    size: UNMAPPED,
    last_change: UNMAPPED,
};

/// `/v4/product/info/stocks`, legacy `/v3` shape under `result`
pub const PRODUCT_STOCKS: StockSchema = StockSchema {
    rows: &["items", "result.items"],
    explode: &["stocks"],
    sku: &[Alias::Path("offer_id")],
    item_id: &[Alias::Path("product_id")],
    barcode: UNMAPPED,
    warehouse_id: UNMAPPED,
    warehouse_name: &[Alias::Path("type")],
    quantity: &[Alias::Path("present")],
    reserved: &[Alias::Path("reserved")],
    in_way_to_client: UNMAPPED,
    in_way_from_client: UNMAPPED,
    price: UNMAPPED,
    discount: UNMAPPED,
    category: UNMAPPED,
    brand: UNMAPPED,
    size: UNMAPPED,
    last_change: UNMAPPED,
};

/// `/v5/product/info/prices`
pub const PRODUCT_PRICES: PriceSchema = PriceSchema {
    rows: &["items", "result.items"],
    explode: &[],
    sku: &[Alias::Path("offer_id")],
    item_id: &[Alias::Path("product_id")],
    price: &[Alias::Path("price.price"), Alias::Path("price.marketing_price")],
    old_price: &[Alias::Path("price.old_price")],
    discount: UNMAPPED,
    currency: &[Alias::Path("price.currency_code")],
    timestamp: UNMAPPED,
    default_currency: Some("RUB"),
};

/// Opaque cursor of a listing response, `last_id` for the legacy shape
pub const CURSOR_PATHS: [&str; 3] = ["cursor", "last_id", "result.last_id"];
