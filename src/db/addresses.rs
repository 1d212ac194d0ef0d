use diesel::PgConnection;
use diesel::prelude::*;
use log::warn;
use uuid::Uuid;

use crate::db::connection::Database;
use crate::db::error::StoreError;
use crate::db::listings::existing_listing_ids;
use crate::db::models::{Address, NewAddress};
use crate::schema;

/// Insert addresses whose parent listing exists; others are dropped before the write.
///
/// Conflicts (same id, or a listing that already has an address) are ignored.
/// Returns the number of rows written.
pub fn insert_addresses(conn: &mut PgConnection, rows: &[NewAddress]) -> Result<usize, StoreError> {
    if rows.is_empty() {
        return Ok(0);
    }

    let parents = rows.iter().map(|a| a.listing_id).collect::<Vec<_>>();
    let existing = existing_listing_ids(conn, &parents)?;
    let valid = rows
        .iter()
        .filter(|a| existing.contains(&a.listing_id))
        .cloned()
        .collect::<Vec<_>>();
    if valid.len() < rows.len() {
        warn!(
            "Dropping {} address(es) whose listing does not exist",
            rows.len() - valid.len()
        );
    }
    if valid.is_empty() {
        return Ok(0);
    }

    use schema::addresses::dsl as A;

    diesel::insert_into(A::addresses)
        .values(&valid)
        .on_conflict_do_nothing()
        .execute(conn)
        .map_err(StoreError::query("insert addresses failed"))
}

pub struct AddressRepository {
    db: Database,
}

impl AddressRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn create_one(&self, address: &NewAddress) -> Result<bool, StoreError> {
        self.db
            .with_transaction(|conn| insert_addresses(conn, std::slice::from_ref(address)))
            .map(|count| count > 0)
    }

    pub fn create_bulk(&self, rows: &[NewAddress]) -> Result<usize, StoreError> {
        self.db.with_transaction(|conn| insert_addresses(conn, rows))
    }

    pub fn get_by_id(&self, id: Uuid) -> Result<Option<Address>, StoreError> {
        use schema::addresses::dsl as A;

        self.db.with_conn(|conn| {
            A::addresses
                .find(id)
                .select(Address::as_select())
                .first(conn)
                .optional()
                .map_err(StoreError::query("fetch address failed"))
        })
    }

    pub fn get_by_listing_id(&self, listing_id: Uuid) -> Result<Option<Address>, StoreError> {
        use schema::addresses::dsl as A;

        self.db.with_conn(|conn| {
            A::addresses
                .filter(A::listing_id.eq(listing_id))
                .select(Address::as_select())
                .first(conn)
                .optional()
                .map_err(StoreError::query("fetch address by listing failed"))
        })
    }

    pub fn search_by_zipcode(&self, zipcode: &str) -> Result<Vec<Address>, StoreError> {
        use schema::addresses::dsl as A;

        self.db.with_conn(|conn| {
            A::addresses
                .filter(A::zipcode.eq(zipcode))
                .select(Address::as_select())
                .load(conn)
                .map_err(StoreError::query("search addresses by zipcode failed"))
        })
    }

    pub fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        use schema::addresses::dsl as A;

        self.db.with_conn(|conn| {
            diesel::delete(A::addresses.find(id))
                .execute(conn)
                .map(|count| count > 0)
                .map_err(StoreError::query("delete address failed"))
        })
    }
}
