//! Diesel model structs for the four persisted entities.
//!
//! `New*` structs are the canonical entities produced by the normalizer. They
//! carry their process-generated `id` so dependents can reference a listing
//! before it is written.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema;

/// Status stored when the source does not report one.
pub const UNKNOWN_STATUS: &str = "STATUS_TYPE_UNKNOWN";

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::brokers)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Broker {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::brokers)]
pub struct NewBroker {
    pub id: Uuid,
    pub name: String,
}

impl NewBroker {
    pub fn new(name: impl Into<String>) -> Self {
        NewBroker {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Associations, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::listings)]
#[diesel(belongs_to(Broker))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Listing {
    pub id: Uuid,
    pub external_id: String,
    pub price: f64,
    pub status: String,
    pub bedrooms: i32,
    pub bathrooms: i32,
    pub area: Option<f64>,
    pub home_type: Option<String>,
    pub detail_url: Option<String>,
    pub broker_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::listings)]
pub struct NewListing {
    pub id: Uuid,
    pub external_id: String,
    pub price: f64,
    pub status: String,
    pub bedrooms: i32,
    pub bathrooms: i32,
    pub area: Option<f64>,
    pub home_type: Option<String>,
    pub detail_url: Option<String>,
    pub broker_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Associations, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::addresses)]
#[diesel(belongs_to(Listing))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Address {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zipcode: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::addresses)]
pub struct NewAddress {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zipcode: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Associations, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::images)]
#[diesel(belongs_to(Listing))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Image {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::images)]
pub struct NewImage {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub url: String,
}

impl NewImage {
    pub fn new(listing_id: Uuid, url: impl Into<String>) -> Self {
        NewImage {
            id: Uuid::new_v4(),
            listing_id,
            url: url.into(),
        }
    }
}
