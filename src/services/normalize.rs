//! Raw record -> canonical entities.
//!
//! Every field has an ordered list of candidate locations. A later candidate is
//! consulted only when the earlier ones are absent (missing, null, empty string
//! or not convertible); values are never merged across candidates.
//!
//! Nothing here touches storage. The only non-determinism is freshly generated
//! identifiers.

use chrono::Utc;
use log::{debug, warn};
use rand::Rng;
use serde_json::Value;
use uuid::Uuid;

use crate::db::models::{NewAddress, NewImage, NewListing, UNKNOWN_STATUS};
use crate::models::search::RawRecord;

/// Prefix of external ids made up for records that arrive without one.
pub const SYNTHETIC_ID_PREFIX: &str = "synthetic-";

type Path = &'static [&'static str];

const EXTERNAL_ID: &[Path] = &[&["id"], &["zpid"]];
const PRICE: Path = &["unformattedPrice"];
const STATUS: &[Path] = &[&["statusType"]];
const BEDS: &[Path] = &[&["beds"], &["hdpData", "homeInfo", "beds"]];
const BATHS: &[Path] = &[&["baths"], &["hdpData", "homeInfo", "baths"]];
const AREA: &[Path] = &[&["hdpData", "homeInfo", "livingArea"]];
const HOME_TYPE: &[Path] = &[&["hdpData", "homeInfo", "homeType"]];
const DETAIL_URL: &[Path] = &[&["detailUrl"]];
const BROKER_NAME: &[Path] = &[&["brokerName"]];

const ZIPCODE: &[Path] = &[&["zipcode"], &["hdpData", "homeInfo", "zipcode"]];
const STREET: &[Path] = &[&["hdpData", "homeInfo", "streetAddress"], &["addressStreet"]];
const CITY: &[Path] = &[&["hdpData", "homeInfo", "city"], &["addressCity"]];
const STATE: &[Path] = &[&["hdpData", "homeInfo", "state"], &["addressState"]];
const LATITUDE: &[Path] = &[&["latLong", "latitude"], &["hdpData", "homeInfo", "latitude"]];
const LONGITUDE: &[Path] = &[&["latLong", "longitude"], &["hdpData", "homeInfo", "longitude"]];

const PHOTOS: Path = &["carouselPhotos"];

/// Everything one raw record contributes to storage.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub listing: NewListing,
    pub address: Option<NewAddress>,
    pub images: Vec<NewImage>,
    pub broker_name: Option<String>,
}

impl NormalizedRecord {
    pub fn external_id(&self) -> &str {
        &self.listing.external_id
    }
}

/// `None` when the listing itself is rejected; address and images are optional parts.
pub fn normalize_record(raw: &RawRecord) -> Option<NormalizedRecord> {
    let listing = normalize_listing(raw)?;
    let address = normalize_address(raw, listing.id);
    let images = normalize_images(raw, listing.id);
    if address.is_none() {
        debug!("Listing {} has no zipcode; address skipped", listing.external_id);
    }
    Some(NormalizedRecord {
        broker_name: broker_name(raw),
        listing,
        address,
        images,
    })
}

pub fn normalize_listing(raw: &RawRecord) -> Option<NewListing> {
    let external_id = first_text(raw, EXTERNAL_ID).unwrap_or_else(synthesize_external_id);

    let Some(price) = parse_price(lookup(raw, PRICE)) else {
        warn!(
            "Rejecting listing {}: unparsable price {}",
            external_id,
            lookup(raw, PRICE).map(Value::to_string).unwrap_or_default()
        );
        return None;
    };

    Some(NewListing {
        id: Uuid::new_v4(),
        price,
        status: first_text(raw, STATUS).unwrap_or_else(|| UNKNOWN_STATUS.to_string()),
        bedrooms: first_count(raw, BEDS),
        bathrooms: first_count(raw, BATHS),
        area: first_number(raw, AREA),
        home_type: first_text(raw, HOME_TYPE),
        detail_url: first_text(raw, DETAIL_URL),
        broker_id: None,
        external_id,
    })
}

pub fn normalize_address(raw: &RawRecord, listing_id: Uuid) -> Option<NewAddress> {
    let zipcode = first_text(raw, ZIPCODE)?;
    Some(NewAddress {
        id: Uuid::new_v4(),
        listing_id,
        street: first_text(raw, STREET),
        city: first_text(raw, CITY),
        state: first_text(raw, STATE),
        zipcode,
        latitude: first_number(raw, LATITUDE),
        longitude: first_number(raw, LONGITUDE),
    })
}

/// Entries without a usable URL are dropped; no photos yields an empty vec.
pub fn normalize_images(raw: &RawRecord, listing_id: Uuid) -> Vec<NewImage> {
    let Some(photos) = lookup(raw, PHOTOS).and_then(Value::as_array) else {
        return Vec::new();
    };
    let images = photos
        .iter()
        .filter_map(|photo| photo.get("url").and_then(text))
        .map(|url| NewImage::new(listing_id, url))
        .collect::<Vec<_>>();
    if images.len() < photos.len() {
        debug!("Dropped {} photo(s) without url", photos.len() - images.len());
    }
    images
}

pub fn broker_name(raw: &RawRecord) -> Option<String> {
    first_text(raw, BROKER_NAME)
}

pub fn is_synthetic_id(external_id: &str) -> bool {
    external_id.starts_with(SYNTHETIC_ID_PREFIX)
}

fn synthesize_external_id() -> String {
    let suffix = rand::rng().random_range(0..1_000_000u32);
    let id = format!("{}{}-{:06}", SYNTHETIC_ID_PREFIX, Utc::now().timestamp_millis(), suffix);
    warn!("Record has no external id; using {}", id);
    id
}

/// Textual prices keep only their digits; missing means 0; anything else unparsable rejects.
fn parse_price(value: Option<&Value>) -> Option<f64> {
    match value {
        None | Some(Value::Null) => Some(0.0),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s
            .chars()
            .filter(char::is_ascii_digit)
            .collect::<String>()
            .parse::<f64>()
            .ok(),
        Some(_) => None,
    }
}

fn lookup<'a>(raw: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(raw, |node, key| node.get(*key))
}

fn first_text(raw: &Value, candidates: &[Path]) -> Option<String> {
    candidates.iter().filter_map(|p| lookup(raw, p)).find_map(text)
}

fn first_number(raw: &Value, candidates: &[Path]) -> Option<f64> {
    candidates.iter().filter_map(|p| lookup(raw, p)).find_map(number)
}

/// Zero at an earlier location also falls through to the next one.
fn first_count(raw: &Value, candidates: &[Path]) -> i32 {
    candidates
        .iter()
        .filter_map(|p| lookup(raw, p))
        .filter_map(number)
        .filter(|n| *n >= 1.0)
        .map(|n| n.trunc().min(i32::MAX as f64) as i32)
        .next()
        .unwrap_or(0)
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}
