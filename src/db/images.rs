use diesel::PgConnection;
use diesel::prelude::*;
use log::warn;
use uuid::Uuid;

use crate::db::connection::Database;
use crate::db::error::StoreError;
use crate::db::listings::existing_listing_ids;
use crate::db::models::{Image, NewImage};
use crate::schema;

/// Insert images whose parent listing exists, ignoring id conflicts. Returns rows written.
pub fn insert_images(conn: &mut PgConnection, rows: &[NewImage]) -> Result<usize, StoreError> {
    if rows.is_empty() {
        return Ok(0);
    }

    let mut parents = rows.iter().map(|i| i.listing_id).collect::<Vec<_>>();
    parents.sort_unstable();
    parents.dedup();
    let existing = existing_listing_ids(conn, &parents)?;
    let valid = rows
        .iter()
        .filter(|i| existing.contains(&i.listing_id))
        .cloned()
        .collect::<Vec<_>>();
    if valid.len() < rows.len() {
        warn!("Dropping {} image(s) whose listing does not exist", rows.len() - valid.len());
    }
    if valid.is_empty() {
        return Ok(0);
    }

    use schema::images::dsl as I;

    diesel::insert_into(I::images)
        .values(&valid)
        .on_conflict(I::id)
        .do_nothing()
        .execute(conn)
        .map_err(StoreError::query("insert images failed"))
}

pub struct ImageRepository {
    db: Database,
}

impl ImageRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn create_one(&self, image: &NewImage) -> Result<bool, StoreError> {
        self.db
            .with_transaction(|conn| insert_images(conn, std::slice::from_ref(image)))
            .map(|count| count > 0)
    }

    pub fn create_bulk(&self, rows: &[NewImage]) -> Result<usize, StoreError> {
        self.db.with_transaction(|conn| insert_images(conn, rows))
    }

    pub fn get_by_id(&self, id: Uuid) -> Result<Option<Image>, StoreError> {
        use schema::images::dsl as I;

        self.db.with_conn(|conn| {
            I::images
                .find(id)
                .select(Image::as_select())
                .first(conn)
                .optional()
                .map_err(StoreError::query("fetch image failed"))
        })
    }

    pub fn get_by_listing_id(&self, listing_id: Uuid) -> Result<Vec<Image>, StoreError> {
        use schema::images::dsl as I;

        self.db.with_conn(|conn| {
            I::images
                .filter(I::listing_id.eq(listing_id))
                .order(I::id.asc())
                .select(Image::as_select())
                .load(conn)
                .map_err(StoreError::query("fetch images by listing failed"))
        })
    }

    pub fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        use schema::images::dsl as I;

        self.db.with_conn(|conn| {
            diesel::delete(I::images.find(id))
                .execute(conn)
                .map(|count| count > 0)
                .map_err(StoreError::query("delete image failed"))
        })
    }

    pub fn delete_by_listing_id(&self, listing_id: Uuid) -> Result<usize, StoreError> {
        use schema::images::dsl as I;

        self.db.with_conn(|conn| {
            diesel::delete(I::images.filter(I::listing_id.eq(listing_id)))
                .execute(conn)
                .map_err(StoreError::query("delete images by listing failed"))
        })
    }
}
