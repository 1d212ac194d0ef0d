use std::collections::{BTreeMap, BTreeSet};

use log::info;
use uuid::Uuid;

use crate::db::brokers::upsert_brokers;
use crate::db::connection::Database;
use crate::db::error::StoreError;
use crate::services::normalize::NormalizedRecord;

/// Maps broker names to stored identifiers, creating brokers on first sight.
///
/// Keyed on name, so resolving the same name from any run or page always
/// yields the identifier assigned the first time it was stored.
pub struct BrokerResolver {
    db: Database,
}

impl BrokerResolver {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn resolve_or_create<I, S>(&self, names: I) -> Result<BTreeMap<String, Uuid>, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let unique = distinct_names(names);
        if unique.is_empty() {
            return Ok(BTreeMap::new());
        }
        let resolved = self.db.with_transaction(|conn| upsert_brokers(conn, &unique))?;
        info!("Resolved {} broker name(s)", resolved.len());
        Ok(resolved)
    }
}

/// Broker names mentioned by a page's accepted records.
pub fn page_broker_names<'a, I>(records: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a NormalizedRecord>,
{
    distinct_names(records.into_iter().filter_map(|r| r.broker_name.as_deref()))
}

fn distinct_names<I, S>(names: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|n| n.as_ref().trim().to_string())
        .filter(|n| !n.is_empty())
        .collect()
}
