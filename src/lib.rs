//! Paginated listing ingestion into Postgres.

pub mod models {
    pub mod search;
}

pub mod client;
pub mod config;
pub mod db {
    pub mod addresses;
    pub mod brokers;
    pub mod connection;
    pub mod error;
    pub mod images;
    pub mod listings;
    pub mod models;
}
pub mod schema;
pub mod services {
    pub mod brokers;
    pub mod normalize;
    pub mod pipeline;
    pub mod store;
}
