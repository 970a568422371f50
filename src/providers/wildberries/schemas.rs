//! Wildberries payload layouts

use crate::providers::normalizer::{Alias, PayloadFormat, PriceSchema, StockSchema, UNMAPPED};
use crate::providers::report::{ReportProfile, StatusVocabulary};

pub const REMAINS_REPORT: ReportProfile = ReportProfile {
    job_id: &["data.taskId", "data.task_id", "taskId"],
    status: &["data.status", "status"],
    file: &[],
    inline: &[],
    format: PayloadFormat::Json,
    vocabulary: StatusVocabulary::STANDARD,
};

/// Pseudo-warehouses in the remains report that carry totals, not stock
pub const SUMMARY_WAREHOUSES: [&str; 3] = [
    "В пути до получателей",
    "В пути возвраты на склад WB",
    "Всего находится на складах",
];

/// `/api/v1/warehouse_remains/tasks/{id}/download`
pub const REMAINS_STOCK: StockSchema = StockSchema {
    rows: &["", "data"],
    explode: &["warehouses"],
    sku: &[
        Alias::Path("vendorCode"),
        Alias::Path("supplierArticle"),
        Alias::Path("supplier_article"),
    ],
    item_id: &[Alias::Path("nmId"), Alias::Path("nmID")],
    barcode: &[Alias::Path("barcode")],
    warehouse_id: UNMAPPED,
    warehouse_name: &[Alias::Path("warehouseName")],
    quantity: &[Alias::Path("quantity")],
    reserved: UNMAPPED,
    in_way_to_client: &[Alias::Path("inWayToClient")],
    in_way_from_client: &[Alias::Path("inWayFromClient")],
    price: UNMAPPED,
    discount: UNMAPPED,
    category: &[Alias::Path("subjectName"), Alias::Path("subject")],
    brand: &[Alias::Path("brand")],
    size: &[Alias::Path("techSize")],
    last_change: UNMAPPED,
};

/// `/api/v1/supplier/stocks`
pub const SUPPLIER_STOCKS: StockSchema = StockSchema {
    rows: &[""],
    explode: &[],
    sku: &[
        Alias::Path("supplierArticle"),
        Alias::Path("supplier_article"),
        Alias::Path("sa"),
    ],
    item_id: &[Alias::Path("nmId"), Alias::Path("nm_id")],
    barcode: &[Alias::Path("barcode")],
    warehouse_id: UNMAPPED,
    warehouse_name: &[Alias::Path("warehouseName"), Alias::Path("warehouse_name")],
    quantity: &[Alias::Path("quantity")],
    reserved: UNMAPPED,
    in_way_to_client: &[Alias::Path("inWayToClient")],
    in_way_from_client: &[Alias::Path("inWayFromClient")],
    price: &[Alias::Path("Price"), Alias::Path("price")],
    discount: &[Alias::Path("Discount"), Alias::Path("discount")],
    category: &[Alias::Path("category"), Alias::Path("subject")],
    brand: &[Alias::Path("brand")],
    size: &[Alias::Path("techSize"), Alias::Path("tech_size")],
    last_change: &[Alias::Path("lastChangeDate"), Alias::Path("last_change_date")],
};

/// `/api/v3/stocks/{warehouseId}` rows, after the card and warehouse
/// fields were joined onto them
pub const SELLER_STOCKS: StockSchema = StockSchema {
    rows: &[""],
    explode: &[],
    sku: &[Alias::Path("vendorCode")],
    item_id: &[Alias::Path("nmID")],
    barcode: &[Alias::Path("barcode"), Alias::Path("sku")],
    warehouse_id: &[Alias::Path("warehouseId")],
    warehouse_name: &[Alias::Path("warehouseName")],
    quantity: &[Alias::Path("amount")],
    reserved: UNMAPPED,
    in_way_to_client: UNMAPPED,
    in_way_from_client: UNMAPPED,
    price: UNMAPPED,
    discount: UNMAPPED,
    category: &[Alias::Path("subjectName")],
    brand: &[Alias::Path("brand")],
    size: &[Alias::Path("techSize")],
    last_change: UNMAPPED,
};

/// `/api/v2/list/goods/filter`
pub const GOODS_PRICES: PriceSchema = PriceSchema {
    rows: &["data.listGoods"],
    explode: &[],
    sku: &[Alias::Path("vendorCode")],
    item_id: &[Alias::Path("nmID"), Alias::Path("nmId")],
    price: &[
        Alias::Path("sizes.0.discountedPrice"),
        Alias::Minor("salePriceU"),
    ],
    old_price: &[Alias::Path("sizes.0.price"), Alias::Minor("priceU")],
    discount: &[Alias::Path("discount")],
    currency: &[Alias::Path("currencyIsoCode4217")],
    timestamp: UNMAPPED,
    default_currency: Some("RUB"),
};
