//! Payload normalization
//!
//! Maps marketplace payloads onto [`StockRecord`] / [`PriceRecord`] through
//! declarative schemas. A schema lists, per canonical field, the places the
//! value has been seen across API versions; the first alias that resolves to
//! a scalar wins.
//!
//! ```text
//! Alias::Path("supplierArticle")                    flat key
//! Alias::Path("price.value")                        nested object
//! Alias::Path("sizes.0.price")                      list index
//! Alias::Minor("salePriceU")                        amount in minor units
//! Alias::Tagged { list: "stocks", key: "type",
//!                 tag: "FIT", field: "count" }     stocks[type=FIT].count
//! ```
//!
//! Missing optional values stay `None`. Structurally broken payloads (no
//! record list, rows that are not objects, negative quantities, garbage in a
//! numeric field) are a [`MarketplaceError::ParseError`] carrying the
//! offending fragment.

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use crate::domain::{MarketplaceId, Money, PriceRecord, StockRecord};
use crate::providers::traits::{MarketplaceError, MarketplaceResult};

// ============================================================================
// Raw payloads
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Json,
    Csv,
}

/// Undecoded response body plus its format
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub format: PayloadFormat,
    pub body: Bytes,
}

impl RawPayload {
    pub fn json(body: impl Into<Bytes>) -> Self {
        RawPayload {
            format: PayloadFormat::Json,
            body: body.into(),
        }
    }

    pub fn csv(body: impl Into<Bytes>) -> Self {
        RawPayload {
            format: PayloadFormat::Csv,
            body: body.into(),
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Decode a payload into JSON; CSV becomes an array of header-keyed objects
pub fn decode(raw: &RawPayload) -> MarketplaceResult<Value> {
    match raw.format {
        PayloadFormat::Json => serde_json::from_slice(&raw.body)
            .map_err(|e| MarketplaceError::parse(format!("JSON parse error: {}", e), &raw.text())),
        PayloadFormat::Csv => decode_csv(&raw.body),
    }
}

fn detect_delimiter(header_line: &str) -> u8 {
    let semicolons = header_line.matches(';').count();
    let commas = header_line.matches(',').count();
    let tabs = header_line.matches('\t').count();

    if semicolons > 0 && semicolons >= commas && semicolons >= tabs {
        b';'
    } else if tabs > commas {
        b'\t'
    } else {
        b','
    }
}

fn decode_csv(body: &[u8]) -> MarketplaceResult<Value> {
    let text = std::str::from_utf8(body).map_err(|e| {
        MarketplaceError::parse(format!("CSV is not UTF-8: {}", e), &String::from_utf8_lossy(body))
    })?;
    let text = text.trim_start_matches('\u{feff}');
    let delimiter = detect_delimiter(text.lines().next().unwrap_or_default());

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| MarketplaceError::parse(format!("CSV header error: {}", e), text))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| MarketplaceError::parse(format!("CSV record error: {}", e), text))?;
        if record.iter().all(str::is_empty) {
            continue;
        }

        let row: Map<String, Value> = headers
            .iter()
            .zip(record.iter())
            .filter(|(header, _)| !header.is_empty())
            .map(|(header, field)| (header.clone(), Value::String(field.to_string())))
            .collect();
        rows.push(Value::Object(row));
    }

    Ok(Value::Array(rows))
}

// ============================================================================
// Schemas
// ============================================================================

/// Where a canonical field may be found
#[derive(Debug, Clone, Copy)]
pub enum Alias {
    /// Dotted path, numeric segments index into lists
    Path(&'static str),
    /// Dotted path to an amount expressed in minor units
    Minor(&'static str),
    /// `field` of the first element of `list` whose `key` equals `tag`
    Tagged {
        list: &'static str,
        key: &'static str,
        tag: &'static str,
        field: &'static str,
    },
}

/// Alias list for one field, tried in order
pub type FieldSpec = &'static [Alias];

/// Field that a schema does not map
pub const UNMAPPED: FieldSpec = &[];

#[derive(Debug, Clone, Copy)]
pub struct StockSchema {
    /// Paths to the record list, `""` is the payload root
    pub rows: &'static [&'static str],
    /// Nested list keys flattened into one row per child, in order
    pub explode: &'static [&'static str],
    pub sku: FieldSpec,
    pub item_id: FieldSpec,
    pub barcode: FieldSpec,
    pub warehouse_id: FieldSpec,
    pub warehouse_name: FieldSpec,
    pub quantity: FieldSpec,
    pub reserved: FieldSpec,
    pub in_way_to_client: FieldSpec,
    pub in_way_from_client: FieldSpec,
    pub price: FieldSpec,
    pub discount: FieldSpec,
    pub category: FieldSpec,
    pub brand: FieldSpec,
    pub size: FieldSpec,
    pub last_change: FieldSpec,
}

#[derive(Debug, Clone, Copy)]
pub struct PriceSchema {
    pub rows: &'static [&'static str],
    pub explode: &'static [&'static str],
    pub sku: FieldSpec,
    pub item_id: FieldSpec,
    pub price: FieldSpec,
    pub old_price: FieldSpec,
    pub discount: FieldSpec,
    pub currency: FieldSpec,
    pub timestamp: FieldSpec,
    /// Currency assumed when the payload carries none
    pub default_currency: Option<&'static str>,
}

// ============================================================================
// Lookup
// ============================================================================

/// Resolve a dotted path inside a JSON value
pub fn lookup<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    if path.is_empty() {
        return Some(value);
    }

    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null | Value::Object(_) | Value::Array(_) => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

/// First alias with a scalar value; the flag is set for minor-unit aliases
fn resolve<'v>(row: &'v Value, spec: FieldSpec) -> Option<(&'v Value, bool)> {
    spec.iter().find_map(|alias| {
        let (found, minor) = match *alias {
            Alias::Path(path) => (lookup(row, path), false),
            Alias::Minor(path) => (lookup(row, path), true),
            Alias::Tagged { list, key, tag, field } => {
                let entry = lookup(row, list)?.as_array()?.iter().find(|entry| {
                    entry
                        .get(key)
                        .and_then(Value::as_str)
                        .is_some_and(|t| t.eq_ignore_ascii_case(tag))
                })?;
                (lookup(entry, field), false)
            }
        };
        found.filter(|v| is_present(v)).map(|v| (v, minor))
    })
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s.chars().filter(|c| !c.is_whitespace()).collect();
            cleaned.replace(',', ".").parse::<f64>().ok().filter(|f| f.is_finite())
        }
        _ => None,
    }
}

/// Typed accessors over one row
struct Row<'a>(&'a Value);

impl<'a> Row<'a> {
    fn error(&self, message: String) -> MarketplaceError {
        MarketplaceError::parse(message, &self.0.to_string())
    }

    fn text(&self, spec: FieldSpec) -> Option<String> {
        match resolve(self.0, spec)?.0 {
            Value::String(s) => Some(s.trim().to_string()),
            other => Some(other.to_string()),
        }
    }

    fn number(&self, spec: FieldSpec) -> MarketplaceResult<Option<(f64, bool)>> {
        let Some((value, minor)) = resolve(self.0, spec) else {
            return Ok(None);
        };
        numeric(value)
            .map(|n| Some((n, minor)))
            .ok_or_else(|| self.error(format!("not a number: {}", value)))
    }

    fn count(&self, spec: FieldSpec) -> MarketplaceResult<Option<u64>> {
        if let Some(n) = resolve(self.0, spec).and_then(|(v, _)| v.as_u64()) {
            return Ok(Some(n));
        }
        match self.number(spec)? {
            None => Ok(None),
            // u64::MAX as f64 rounds up to 2^64, which is already out of range
            Some((n, _)) if n >= 0.0 && n.fract() == 0.0 && n < u64::MAX as f64 => Ok(Some(n as u64)),
            Some((n, _)) => Err(self.error(format!("invalid quantity: {}", n))),
        }
    }

    fn money(&self, spec: FieldSpec) -> MarketplaceResult<Option<Money>> {
        Ok(self.number(spec)?.map(|(n, minor)| {
            if minor {
                Money::from_minor(n.round() as i64)
            } else {
                Money::from_major(n)
            }
        }))
    }

    fn percent(&self, spec: FieldSpec) -> MarketplaceResult<Option<f64>> {
        Ok(self.number(spec)?.map(|(n, _)| n))
    }

    fn timestamp(&self, spec: FieldSpec) -> MarketplaceResult<Option<DateTime<Utc>>> {
        let Some((value, _)) = resolve(self.0, spec) else {
            return Ok(None);
        };
        let parsed = match value {
            Value::String(s) => parse_timestamp(s),
            Value::Number(n) => n.as_i64().and_then(|secs| DateTime::from_timestamp(secs, 0)),
            _ => None,
        };
        parsed
            .map(Some)
            .ok_or_else(|| self.error(format!("invalid timestamp: {}", value)))
    }
}

/// Parse the timestamp spellings seen in marketplace payloads.
///
/// Values without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    const DATETIME_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%d.%m.%Y %H:%M:%S",
        "%d.%m.%Y %H:%M",
    ];
    for format in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ts.and_utc());
        }
    }

    for format in ["%Y-%m-%d", "%d.%m.%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.and_hms_opt(0, 0, 0).map(|ts| ts.and_utc());
        }
    }

    None
}

// ============================================================================
// Rows
// ============================================================================

fn explode(rows: Vec<Value>, key: &str) -> MarketplaceResult<Vec<Value>> {
    let mut out = Vec::with_capacity(rows.len());

    for row in rows {
        let Value::Object(mut parent) = row else {
            return Err(MarketplaceError::parse("record is not an object", &row.to_string()));
        };

        match parent.remove(key) {
            Some(Value::Array(children)) if !children.is_empty() => {
                for child in children {
                    let Value::Object(child) = child else {
                        return Err(MarketplaceError::parse(
                            format!("entry of '{}' is not an object", key),
                            &child.to_string(),
                        ));
                    };
                    let mut merged = parent.clone();
                    merged.extend(child);
                    out.push(Value::Object(merged));
                }
            }
            Some(Value::Array(_)) | Some(Value::Null) | None => out.push(Value::Object(parent)),
            Some(other) => {
                return Err(MarketplaceError::parse(
                    format!("'{}' is not a list", key),
                    &other.to_string(),
                ))
            }
        }
    }

    Ok(out)
}

/// Locate the record list and flatten nested lists into rows.
///
/// An explicit `null` list is an empty result; a missing one is an error.
pub fn rows(payload: &Value, paths: &[&str], explode_keys: &[&str]) -> MarketplaceResult<Vec<Value>> {
    let found = paths
        .iter()
        .find_map(|path| lookup(payload, path).filter(|v| v.is_array() || v.is_null()));

    let mut rows = match found {
        Some(Value::Array(items)) => items.clone(),
        Some(_) => Vec::new(),
        None => {
            return Err(MarketplaceError::parse(
                format!("record list not found at {:?}", paths),
                &payload.to_string(),
            ))
        }
    };

    if let Some(bad) = rows.iter().find(|row| !row.is_object()) {
        return Err(MarketplaceError::parse("record is not an object", &bad.to_string()));
    }

    for key in explode_keys {
        rows = explode(rows, key)?;
    }

    Ok(rows)
}

// ============================================================================
// Normalization
// ============================================================================

/// Normalize a decoded payload into stock records
pub fn normalize_stock(
    schema: &StockSchema,
    marketplace: MarketplaceId,
    store_id: &str,
    payload: &Value,
) -> MarketplaceResult<Vec<StockRecord>> {
    rows(payload, schema.rows, schema.explode)?
        .iter()
        .map(|row| stock_record(schema, marketplace, store_id, &Row(row)))
        .collect()
}

fn stock_record(
    schema: &StockSchema,
    marketplace: MarketplaceId,
    store_id: &str,
    row: &Row<'_>,
) -> MarketplaceResult<StockRecord> {
    Ok(StockRecord {
        sku: row.text(schema.sku),
        item_id: row.text(schema.item_id),
        barcode: row.text(schema.barcode),
        warehouse_id: row.text(schema.warehouse_id),
        warehouse_name: row.text(schema.warehouse_name),
        quantity: row.count(schema.quantity)?,
        reserved: row.count(schema.reserved)?,
        in_way_to_client: row.count(schema.in_way_to_client)?,
        in_way_from_client: row.count(schema.in_way_from_client)?,
        price: row.money(schema.price)?,
        discount_percent: row.percent(schema.discount)?,
        category: row.text(schema.category),
        brand: row.text(schema.brand),
        size: row.text(schema.size),
        last_change: row.timestamp(schema.last_change)?,
        ..StockRecord::new(marketplace, store_id)
    })
}

/// Normalize a decoded payload into price records
pub fn normalize_prices(
    schema: &PriceSchema,
    marketplace: MarketplaceId,
    store_id: &str,
    payload: &Value,
) -> MarketplaceResult<Vec<PriceRecord>> {
    rows(payload, schema.rows, schema.explode)?
        .iter()
        .map(|row| {
            let row = Row(row);
            Ok(PriceRecord {
                sku: row.text(schema.sku),
                item_id: row.text(schema.item_id),
                price: row.money(schema.price)?,
                old_price: row.money(schema.old_price)?,
                discount_percent: row.percent(schema.discount)?,
                currency: row
                    .text(schema.currency)
                    .or_else(|| schema.default_currency.map(str::to_string)),
                timestamp: row.timestamp(schema.timestamp)?,
                ..PriceRecord::new(marketplace, store_id)
            })
        })
        .collect()
}

/// Decode and normalize in one step
pub fn normalize_stock_payload(
    schema: &StockSchema,
    marketplace: MarketplaceId,
    store_id: &str,
    raw: &RawPayload,
) -> MarketplaceResult<Vec<StockRecord>> {
    normalize_stock(schema, marketplace, store_id, &decode(raw)?)
}
