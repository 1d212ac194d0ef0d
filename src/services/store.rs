//! Storage seam used by the pipeline.
//!
//! `PgStore` writes one record (listing, address, images) as a single unit of
//! work: one transaction, with the address and the image batch each in their
//! own savepoint so that a failing dependent is dropped without losing the
//! listing or its other dependent.

use std::collections::{BTreeMap, BTreeSet};

use diesel::PgConnection;
use diesel::prelude::*;
use log::error;
use uuid::Uuid;

use crate::db::addresses::insert_addresses;
use crate::db::connection::Database;
use crate::db::error::StoreError;
use crate::db::images::insert_images;
use crate::db::listings::insert_listing;
use crate::services::brokers::BrokerResolver;
use crate::services::normalize::NormalizedRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Written(usize),
    /// Nothing to write (no zipcode, no photos).
    Skipped,
    /// The write failed and was rolled back on its own.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted { address: StepOutcome, images: StepOutcome },
    /// The external id was already stored; nothing was written.
    AlreadyStored,
}

pub trait ListingStore {
    fn resolve_brokers(&self, names: &BTreeSet<String>) -> Result<BTreeMap<String, Uuid>, StoreError>;

    /// The listing must carry its resolved broker id (or none) before this call.
    fn persist_record(&self, record: &NormalizedRecord) -> Result<RecordOutcome, StoreError>;
}

pub struct PgStore {
    db: Database,
    brokers: BrokerResolver,
}

impl PgStore {
    pub fn new(db: Database) -> Self {
        Self {
            brokers: BrokerResolver::new(db.clone()),
            db,
        }
    }
}

impl ListingStore for PgStore {
    fn resolve_brokers(&self, names: &BTreeSet<String>) -> Result<BTreeMap<String, Uuid>, StoreError> {
        self.brokers.resolve_or_create(names)
    }

    fn persist_record(&self, record: &NormalizedRecord) -> Result<RecordOutcome, StoreError> {
        let external_id = record.external_id();
        self.db.with_transaction(|conn| {
            if insert_listing(conn, &record.listing)?.is_none() {
                return Ok(RecordOutcome::AlreadyStored);
            }

            let address = match &record.address {
                Some(address) => in_savepoint(conn, "address", external_id, |c| {
                    insert_addresses(c, std::slice::from_ref(address))
                })?,
                None => StepOutcome::Skipped,
            };
            let images = if record.images.is_empty() {
                StepOutcome::Skipped
            } else {
                in_savepoint(conn, "images", external_id, |c| insert_images(c, &record.images))?
            };
            Ok(RecordOutcome::Inserted { address, images })
        })
    }
}

/// Run `f` in a nested transaction. Ordinary failures are logged and reported as
/// `Failed`; a lost connection still aborts the whole unit of work.
fn in_savepoint<F>(conn: &mut PgConnection, what: &str, external_id: &str, f: F) -> Result<StepOutcome, StoreError>
where
    F: FnOnce(&mut PgConnection) -> Result<usize, StoreError>,
{
    match conn.transaction(f) {
        Ok(count) => Ok(StepOutcome::Written(count)),
        Err(e) if e.is_connection_failure() => Err(e),
        Err(e) => {
            error!("Persisting {} for listing {} failed: {}", what, external_id, e);
            Ok(StepOutcome::Failed)
        }
    }
}
