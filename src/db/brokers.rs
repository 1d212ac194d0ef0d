use std::collections::{BTreeMap, BTreeSet};

use diesel::PgConnection;
use diesel::prelude::*;
use diesel::upsert::excluded;
use uuid::Uuid;

use crate::db::connection::Database;
use crate::db::error::StoreError;
use crate::db::models::{Broker, NewBroker};
use crate::schema;

/// Upsert brokers keyed on name in one statement and return name -> id for every input name.
///
/// Names already stored keep their identifier; the conflict branch rewrites the
/// name to itself so `RETURNING` yields existing rows too.
pub fn upsert_brokers(conn: &mut PgConnection, names: &BTreeSet<String>) -> Result<BTreeMap<String, Uuid>, StoreError> {
    if names.is_empty() {
        return Ok(BTreeMap::new());
    }

    use schema::brokers::dsl as B;

    let rows = names.iter().map(|name| NewBroker::new(name.as_str())).collect::<Vec<_>>();
    let resolved: Vec<(Uuid, String)> = diesel::insert_into(B::brokers)
        .values(&rows)
        .on_conflict(B::name)
        .do_update()
        .set(B::name.eq(excluded(B::name)))
        .returning((B::id, B::name))
        .get_results(conn)
        .map_err(StoreError::query("upsert brokers failed"))?;

    Ok(resolved.into_iter().map(|(id, name)| (name, id)).collect())
}

pub struct BrokerRepository {
    db: Database,
}

impl BrokerRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn create_one(&self, name: &str) -> Result<Broker, StoreError> {
        use schema::brokers::dsl as B;

        let row = NewBroker::new(name);
        self.db.with_conn(|conn| {
            diesel::insert_into(B::brokers)
                .values(&row)
                .on_conflict(B::name)
                .do_update()
                .set(B::name.eq(excluded(B::name)))
                .returning(Broker::as_returning())
                .get_result(conn)
                .map_err(StoreError::query("upsert broker failed"))
        })
    }

    /// Duplicate names collapse before the write.
    pub fn create_bulk(&self, names: &[String]) -> Result<BTreeMap<String, Uuid>, StoreError> {
        let unique = names.iter().cloned().collect::<BTreeSet<_>>();
        self.db.with_transaction(|conn| upsert_brokers(conn, &unique))
    }

    pub fn get_by_id(&self, id: Uuid) -> Result<Option<Broker>, StoreError> {
        use schema::brokers::dsl as B;

        self.db.with_conn(|conn| {
            B::brokers
                .find(id)
                .select(Broker::as_select())
                .first(conn)
                .optional()
                .map_err(StoreError::query("fetch broker failed"))
        })
    }

    pub fn get_by_name(&self, name: &str) -> Result<Option<Broker>, StoreError> {
        use schema::brokers::dsl as B;

        self.db.with_conn(|conn| {
            B::brokers
                .filter(B::name.eq(name))
                .select(Broker::as_select())
                .first(conn)
                .optional()
                .map_err(StoreError::query("fetch broker by name failed"))
        })
    }

    /// Case-insensitive substring match, ordered by name.
    pub fn search_by_name(&self, pattern: &str, limit: i64) -> Result<Vec<Broker>, StoreError> {
        use schema::brokers::dsl as B;

        let like = format!("%{}%", pattern.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_"));
        self.db.with_conn(|conn| {
            B::brokers
                .filter(B::name.ilike(like))
                .order(B::name.asc())
                .limit(limit)
                .select(Broker::as_select())
                .load(conn)
                .map_err(StoreError::query("search brokers failed"))
        })
    }

    /// Listings pointing at the broker keep existing with a null reference.
    pub fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        use schema::brokers::dsl as B;

        self.db.with_conn(|conn| {
            diesel::delete(B::brokers.find(id))
                .execute(conn)
                .map(|count| count > 0)
                .map_err(StoreError::query("delete broker failed"))
        })
    }
}
