//! Wildberries request models
//!
//! Only the bodies of the seller-warehouse (FBS) path are typed; responses
//! go through the normalizer schemas.

use serde::Serialize;

/// `POST /content/v2/get/cards/list`
#[derive(Debug, Serialize)]
pub struct CardsListRequest {
    pub settings: CardsSettings,
}

#[derive(Debug, Serialize)]
pub struct CardsSettings {
    pub cursor: CardsCursor,
    pub filter: CardsFilter,
}

/// Page position: `updatedAt` and `nmID` of the last card already seen
#[derive(Debug, Serialize)]
pub struct CardsCursor {
    pub limit: usize,
    #[serde(rename = "updatedAt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(rename = "nmID", skip_serializing_if = "Option::is_none")]
    pub nm_id: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CardsFilter {
    /// -1 lists cards with and without photos
    #[serde(rename = "withPhoto")]
    pub with_photo: i8,
}

impl CardsListRequest {
    pub fn page(limit: usize, after: Option<(String, u64)>) -> Self {
        let (updated_at, nm_id) = match after {
            Some((updated_at, nm_id)) => (Some(updated_at), Some(nm_id)),
            None => (None, None),
        };
        CardsListRequest {
            settings: CardsSettings {
                cursor: CardsCursor { limit, updated_at, nm_id },
                filter: CardsFilter { with_photo: -1 },
            },
        }
    }
}

/// `POST /api/v3/stocks/{warehouseId}`
#[derive(Debug, Serialize)]
pub struct SellerStocksRequest<'a> {
    #[serde(rename = "chrtIds")]
    pub chrt_ids: &'a [u64],
}
