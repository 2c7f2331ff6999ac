use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::places::RawPlace;

/// Column order shared by the canonical and incremental CSV stores.
pub const COLUMNS: [&str; 9] = [
    "place_id",
    "name",
    "address",
    "postcode",
    "lat",
    "lng",
    "rating",
    "user_ratings_total",
    "borough",
];

static UK_POSTCODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Z]{1,2}\d{1,2}[A-Z]?\s?\d[A-Z]{2}").expect("postcode pattern compiles")
});

/// One accepted pub, in canonical column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceRecord {
    pub place_id: String,
    pub name: Option<String>,
    pub address: Option<String>,
    pub postcode: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub rating: Option<f64>,
    pub user_ratings_total: Option<u64>,
    pub borough: String,
}

/// Maps a raw search result onto a [`PlaceRecord`] owned by `borough`.
///
/// Returns `None` when the result carries no usable `place_id`.
pub fn normalize(raw: &RawPlace, borough: &str) -> Option<PlaceRecord> {
    let place_id = raw
        .place_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())?
        .to_string();
    let location = raw.geometry.as_ref().and_then(|g| g.location.as_ref());
    let address = raw.vicinity.clone();

    Some(PlaceRecord {
        place_id,
        name: raw.name.clone(),
        postcode: address.as_deref().and_then(extract_postcode),
        address,
        lat: location.and_then(|loc| loc.lat),
        lng: location.and_then(|loc| loc.lng),
        rating: raw.rating,
        user_ratings_total: raw.user_ratings_total,
        borough: borough.to_string(),
    })
}

/// First UK-postcode-shaped substring of `address`, if any.
pub fn extract_postcode(address: &str) -> Option<String> {
    UK_POSTCODE
        .find(address)
        .map(|found| found.as_str().to_string())
}
