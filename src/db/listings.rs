use std::collections::HashSet;

use diesel::PgConnection;
use diesel::prelude::*;
use log::info;
use uuid::Uuid;

use crate::db::connection::Database;
use crate::db::error::StoreError;
use crate::db::models::{Listing, NewListing};
use crate::schema;

/// Insert one listing; `None` when its `external_id` is already stored (the stored row wins).
pub fn insert_listing(conn: &mut PgConnection, listing: &NewListing) -> Result<Option<Listing>, StoreError> {
    use schema::listings::dsl as L;

    diesel::insert_into(L::listings)
        .values(listing)
        .on_conflict(L::external_id)
        .do_nothing()
        .returning(Listing::as_returning())
        .get_result(conn)
        .optional()
        .map_err(StoreError::query("insert listing failed"))
}

/// Insert many listings, ignoring `external_id` conflicts. Returns only the rows actually written.
pub fn insert_listings(conn: &mut PgConnection, rows: &[NewListing]) -> Result<Vec<Listing>, StoreError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    use schema::listings::dsl as L;

    diesel::insert_into(L::listings)
        .values(rows)
        .on_conflict(L::external_id)
        .do_nothing()
        .returning(Listing::as_returning())
        .get_results(conn)
        .map_err(StoreError::query("bulk insert listings failed"))
}

/// Subset of `ids` that exist as listings.
pub fn existing_listing_ids(conn: &mut PgConnection, ids: &[Uuid]) -> Result<HashSet<Uuid>, StoreError> {
    if ids.is_empty() {
        return Ok(HashSet::new());
    }

    use schema::listings::dsl as L;

    L::listings
        .filter(L::id.eq_any(ids))
        .select(L::id)
        .load::<Uuid>(conn)
        .map(|found| found.into_iter().collect())
        .map_err(StoreError::query("check listing ids failed"))
}

pub struct ListingRepository {
    db: Database,
}

impl ListingRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn create_one(&self, listing: &NewListing) -> Result<Option<Listing>, StoreError> {
        self.db.with_conn(|conn| insert_listing(conn, listing))
    }

    pub fn create_bulk(&self, rows: &[NewListing]) -> Result<Vec<Listing>, StoreError> {
        let inserted = self.db.with_transaction(|conn| insert_listings(conn, rows))?;
        info!(
            "Inserted {} of {} listing(s); {} already present",
            inserted.len(),
            rows.len(),
            rows.len() - inserted.len()
        );
        Ok(inserted)
    }

    pub fn get_by_id(&self, id: Uuid) -> Result<Option<Listing>, StoreError> {
        use schema::listings::dsl as L;

        self.db.with_conn(|conn| {
            L::listings
                .find(id)
                .select(Listing::as_select())
                .first(conn)
                .optional()
                .map_err(StoreError::query("fetch listing failed"))
        })
    }

    pub fn get_by_external_id(&self, external_id: &str) -> Result<Option<Listing>, StoreError> {
        use schema::listings::dsl as L;

        self.db.with_conn(|conn| {
            L::listings
                .filter(L::external_id.eq(external_id))
                .select(Listing::as_select())
                .first(conn)
                .optional()
                .map_err(StoreError::query("fetch listing by external id failed"))
        })
    }

    /// Delete a listing; its address and images go with it.
    pub fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        use schema::listings::dsl as L;

        self.db.with_conn(|conn| {
            diesel::delete(L::listings.find(id))
                .execute(conn)
                .map(|count| count > 0)
                .map_err(StoreError::query("delete listing failed"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::test_database;
    use crate::db::models::UNKNOWN_STATUS;

    fn listing(external_id: &str, price: f64) -> NewListing {
        NewListing {
            id: Uuid::new_v4(),
            external_id: external_id.to_string(),
            price,
            status: UNKNOWN_STATUS.to_string(),
            bedrooms: 2,
            bathrooms: 1,
            area: Some(900.0),
            home_type: Some("CONDO".into()),
            detail_url: None,
            broker_id: None,
        }
    }

    #[test]
    fn first_seen_listing_wins_on_conflict() {
        let Some(db) = test_database() else { return };
        let repo = ListingRepository::new(db);
        let external_id = format!("test-{}", Uuid::new_v4());

        let first = repo.create_one(&listing(&external_id, 100_000.0)).unwrap().expect("inserted");
        let second = repo.create_one(&listing(&external_id, 250_000.0)).unwrap();
        assert!(second.is_none());

        let stored = repo.get_by_external_id(&external_id).unwrap().expect("stored");
        assert_eq!(stored.id, first.id);
        assert_eq!(stored.price, 100_000.0);

        assert!(repo.delete(first.id).unwrap());
        assert!(repo.get_by_id(first.id).unwrap().is_none());
    }

    #[test]
    fn bulk_insert_skips_existing_external_ids() {
        let Some(db) = test_database() else { return };
        let repo = ListingRepository::new(db);
        let a = format!("test-{}", Uuid::new_v4());
        let b = format!("test-{}", Uuid::new_v4());

        let first = repo.create_bulk(&[listing(&a, 1.0)]).unwrap();
        assert_eq!(first.len(), 1);

        let second = repo.create_bulk(&[listing(&a, 2.0), listing(&b, 3.0)]).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].external_id, b);

        for row in first.iter().chain(second.iter()) {
            repo.delete(row.id).unwrap();
        }
    }
}
