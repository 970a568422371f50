//! Yandex Market payload layouts

use crate::providers::normalizer::{Alias, PayloadFormat, PriceSchema, StockSchema, UNMAPPED};
use crate::providers::report::{ReportProfile, StatusVocabulary};

/// `/reports/stocks-on-warehouses/generate` + `/reports/info/{id}`
pub const STOCKS_REPORT: ReportProfile = ReportProfile {
    job_id: &["result.reportId"],
    status: &["result.status"],
    file: &["result.file"],
    inline: &[],
    format: PayloadFormat::Csv,
    vocabulary: StatusVocabulary::STANDARD,
};

/// Stocks-on-warehouses report columns
pub const REPORT_STOCK: StockSchema = StockSchema {
    rows: &[""],
    explode: &[],
    sku: &[Alias::Path("Ваш SKU"), Alias::Path("SKU"), Alias::Path("Артикул")],
    item_id: &[Alias::Path("SKU на Маркете"), Alias::Path("Market SKU")],
    barcode: &[Alias::Path("Штрихкод")],
    warehouse_id: &[Alias::Path("ID склада")],
    warehouse_name: &[Alias::Path("Склад"), Alias::Path("Название склада")],
    quantity: &[
        Alias::Path("Доступно для заказа"),
        Alias::Path("Доступно к продаже"),
        Alias::Path("Годный"),
    ],
    reserved: &[Alias::Path("Резерв"), Alias::Path("Зарезервировано")],
    in_way_to_client: UNMAPPED,
    in_way_from_client: UNMAPPED,
    price: UNMAPPED,
    discount: UNMAPPED,
    category: &[Alias::Path("Категория")],
    brand: &[Alias::Path("Бренд")],
    size: UNMAPPED,
    last_change: UNMAPPED,
};

/// `/campaigns/{id}/offers/stocks`
pub const OFFER_STOCKS: StockSchema = StockSchema {
    rows: &["result.warehouses"],
    explode: &["offers"],
    sku: &[Alias::Path("offerId")],
    item_id: UNMAPPED,
    barcode: UNMAPPED,
    warehouse_id: &[Alias::Path("warehouseId")],
    warehouse_name: UNMAPPED,
    quantity: &[Alias::Tagged { list: "stocks", key: "type", tag: "FIT", field: "count" }],
    reserved: &[Alias::Tagged { list: "stocks", key: "type", tag: "FREEZE", field: "count" }],
    in_way_to_client: UNMAPPED,
    in_way_from_client: UNMAPPED,
    price: UNMAPPED,
    discount: UNMAPPED,
    category: UNMAPPED,
    brand: UNMAPPED,
    size: UNMAPPED,
    last_change: &[Alias::Path("updatedAt")],
};

/// `/campaigns/{id}/offer-prices`
pub const OFFER_PRICES: PriceSchema = PriceSchema {
    rows: &["result.offers"],
    explode: &[],
    sku: &[Alias::Path("offerId")],
    item_id: UNMAPPED,
    price: &[Alias::Path("price.value")],
    old_price: &[Alias::Path("price.discountBase")],
    discount: UNMAPPED,
    currency: &[Alias::Path("price.currencyId")],
    timestamp: &[Alias::Path("updatedAt")],
    default_currency: Some("RUR"),
};

pub const NEXT_PAGE_TOKEN: &str = "result.paging.nextPageToken";
