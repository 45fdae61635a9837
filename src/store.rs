//! Durable, deduplicated log of observed fixes.
//!
//! The log is kept in SQLite and is always read and written whole: [`PositionStore::load`]
//! returns every fix most-recent-first, [`merge`] folds incoming fixes into a snapshot and
//! [`PositionStore::persist`] swaps the stored table for that snapshot in one transaction.

use std::{cmp::Ordering, collections::HashMap};

use anyhow::Context;
use sqlx::SqlitePool;
use tracing::debug;

use crate::dto::{CoordKey, Fix, FixKey};

#[derive(Clone)]
pub struct PositionStore {
    pool: SqlitePool,
}

impl PositionStore {
    pub fn new(pool: SqlitePool) -> Self {
        PositionStore { pool }
    }

    /// Reads the persisted log. An empty (or freshly created) database yields an empty log.
    pub async fn load(&self) -> anyhow::Result<Vec<Fix>> {
        let mut fixes = sqlx::query_as::<_, Fix>("SELECT * FROM fixes")
            .fetch_all(&self.pool)
            .await
            .context("Could not read the position log")?;

        sort_most_recent_first(&mut fixes);
        Ok(fixes)
    }

    /// Atomically replaces the persisted log with `fixes`.
    pub async fn persist(&self, fixes: &[Fix]) -> anyhow::Result<()> {
        let mut txn = self.pool.begin().await?;

        sqlx::query("DELETE FROM fixes").execute(&mut *txn).await?;

        for fix in fixes {
            sqlx::query(
                "INSERT INTO fixes (
                    timestamp, latitude, longitude, speed, mileage, battery,
                    fix, hdop, description, street, locality, region
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&fix.timestamp)
            .bind(fix.latitude)
            .bind(fix.longitude)
            .bind(fix.speed)
            .bind(fix.mileage)
            .bind(fix.battery)
            .bind(&fix.fix)
            .bind(fix.hdop)
            .bind(&fix.description)
            .bind(&fix.address.street)
            .bind(&fix.address.locality)
            .bind(&fix.address.region)
            .execute(&mut *txn)
            .await?;
        }

        txn.commit().await.context("Could not commit the position log")?;
        debug!("Persisted {} fixes", fixes.len());

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Keyed view over a most-recent-first log, so that [`FixIndex::find_by_key`] does not scan.
pub struct FixIndex<'a> {
    fixes: &'a [Fix],
    by_key: HashMap<FixKey, usize>,
    by_coord: HashMap<CoordKey, usize>,
}

impl<'a> FixIndex<'a> {
    pub fn new(fixes: &'a [Fix]) -> Self {
        let mut by_key = HashMap::with_capacity(fixes.len());
        let mut by_coord = HashMap::new();

        // The first (most recent) fix wins for a coordinate.
        for (index, fix) in fixes.iter().enumerate() {
            by_key.entry(fix.key()).or_insert(index);
            by_coord.entry(fix.coord_key()).or_insert(index);
        }

        FixIndex {
            fixes,
            by_key,
            by_coord,
        }
    }

    /// Exact lookup on `(lat, lon, timestamp)`, or on `(lat, lon)` alone when no timestamp
    /// is given.
    pub fn find_by_key(
        &self,
        latitude: f64,
        longitude: f64,
        timestamp: Option<&str>,
    ) -> Option<&'a Fix> {
        let index = match timestamp {
            Some(timestamp) => self.by_key.get(&FixKey::new(latitude, longitude, timestamp)),
            None => self.by_coord.get(&CoordKey::new(latitude, longitude)),
        }?;

        self.fixes.get(*index)
    }
}

/// Concatenates `existing` and `incoming`, keeps the later record on key collision and
/// re-sorts most-recent-first.
pub fn merge(existing: Vec<Fix>, incoming: Vec<Fix>) -> Vec<Fix> {
    let combined: Vec<Fix> = existing.into_iter().chain(incoming).collect();

    let mut last_index: HashMap<FixKey, usize> = HashMap::with_capacity(combined.len());
    for (index, fix) in combined.iter().enumerate() {
        last_index.insert(fix.key(), index);
    }

    let mut merged: Vec<Fix> = combined
        .into_iter()
        .enumerate()
        .filter(|(index, fix)| last_index.get(&fix.key()) == Some(index))
        .map(|(_, fix)| fix)
        .collect();

    sort_most_recent_first(&mut merged);
    merged
}

/// Timestamp descending. Unparseable timestamps sort after parseable ones, ties are broken on
/// the raw string and then the coordinates so the order is total.
pub fn sort_most_recent_first(fixes: &mut [Fix]) {
    fixes.sort_by(|a, b| compare_recency(b, a));
}

fn compare_recency(a: &Fix, b: &Fix) -> Ordering {
    a.instant()
        .cmp(&b.instant())
        .then_with(|| a.timestamp.cmp(&b.timestamp))
        .then_with(|| a.latitude.total_cmp(&b.latitude))
        .then_with(|| a.longitude.total_cmp(&b.longitude))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::Address;
    use crate::testing::fix_at;
    use crate::util::memory_pool;
    use std::collections::HashSet;

    fn timestamps(fixes: &[Fix]) -> Vec<&str> {
        fixes.iter().map(|f| f.timestamp.as_str()).collect()
    }

    #[test]
    fn merge_is_idempotent() {
        let existing = vec![
            fix_at(45.0, 9.0, "2024-10-18T10:00:00"),
            fix_at(45.1, 9.1, "2024-10-18T09:00:00"),
        ];
        let incoming = fix_at(45.2, 9.2, "2024-10-18T09:30:00");

        let once = merge(existing.clone(), vec![incoming.clone()]);
        let mut repeated = once.clone();
        for _ in 0..5 {
            repeated = merge(repeated, vec![incoming.clone()]);
        }

        assert_eq!(once, repeated);
        assert_eq!(once.len(), 3);
    }

    #[test]
    fn merge_keeps_incoming_on_collision() {
        let mut stale = fix_at(45.0, 9.0, "2024-10-18T10:00:00");
        stale.speed = Some(10.0);
        let mut fresh = stale.clone();
        fresh.speed = Some(55.0);
        fresh.address = Address {
            street: "Via Roma".into(),
            locality: "Milano".into(),
            region: "Lombardia".into(),
        };

        let merged = merge(vec![stale], vec![fresh.clone()]);

        assert_eq!(merged, vec![fresh]);
    }

    #[test]
    fn merge_keeps_revisits_at_different_times() {
        let merged = merge(
            vec![fix_at(45.0, 9.0, "2024-10-18T08:00:00")],
            vec![fix_at(45.0, 9.0, "2024-10-18T12:00:00")],
        );

        assert_eq!(
            timestamps(&merged),
            vec!["2024-10-18T12:00:00", "2024-10-18T08:00:00"]
        );
    }

    #[test]
    fn merged_keys_are_unique_and_ordered() {
        let existing = vec![
            fix_at(45.0, 9.0, "2024-10-18T08:00:00"),
            fix_at(45.0, 9.0, "2024-10-18T09:00:00"),
        ];
        let incoming = vec![
            fix_at(45.0, 9.0, "2024-10-18T09:00:00"),
            fix_at(46.0, 10.0, "2024-10-18T07:00:00"),
            fix_at(46.0, 10.0, "2024-10-18T07:00:00"),
            fix_at(44.0, 8.0, "2024-10-18T11:00:00+02:00"),
        ];

        let merged = merge(existing, incoming);

        let keys: HashSet<FixKey> = merged.iter().map(Fix::key).collect();
        assert_eq!(keys.len(), merged.len());
        assert_eq!(merged.len(), 4);
        assert!(merged
            .windows(2)
            .all(|pair| pair[0].instant() >= pair[1].instant()));
    }

    #[test]
    fn find_by_key_with_and_without_timestamp() {
        let fixes = vec![
            fix_at(45.0, 9.0, "2024-10-18T10:00:00"),
            fix_at(45.1, 9.1, "2024-10-18T09:00:00"),
            fix_at(45.1, 9.1, "2024-10-18T07:00:00"),
        ];
        let index = FixIndex::new(&fixes);

        assert!(index.find_by_key(45.0, 9.0, Some("2024-10-18T10:00:00")).is_some());
        assert!(index.find_by_key(45.0, 9.0, Some("2024-10-18T11:00:00")).is_none());
        assert_eq!(
            index.find_by_key(45.1, 9.1, None).map(|f| f.timestamp.as_str()),
            Some("2024-10-18T09:00:00")
        );
        assert_eq!(
            index
                .find_by_key(45.1, 9.1, Some("2024-10-18T07:00:00"))
                .map(|f| f.timestamp.as_str()),
            Some("2024-10-18T07:00:00")
        );
        assert!(index.find_by_key(45.2, 9.1, None).is_none());
    }

    #[test]
    fn find_by_key_treats_negative_zero_as_zero() {
        let fixes = vec![fix_at(0.0, 9.0, "2024-10-18T10:00:00")];
        let index = FixIndex::new(&fixes);

        assert!(index.find_by_key(-0.0, 9.0, Some("2024-10-18T10:00:00")).is_some());
    }

    #[tokio::test]
    async fn load_of_fresh_database_is_empty() {
        let store = PositionStore::new(memory_pool().await);
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn persist_replaces_log_wholesale() {
        let store = PositionStore::new(memory_pool().await);

        let mut first = fix_at(45.0, 9.0, "2024-10-18T08:00:00");
        first.battery = Some(12.4);
        first.address.locality = "Milano".into();
        store
            .persist(&merge(
                vec![],
                vec![first.clone(), fix_at(45.1, 9.1, "2024-10-18T09:00:00")],
            ))
            .await
            .unwrap();

        let replacement = merge(vec![], vec![first.clone()]);
        store.persist(&replacement).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, vec![first]);
    }

    #[tokio::test]
    async fn failed_persist_keeps_previous_log() {
        let store = PositionStore::new(memory_pool().await);
        let original = vec![fix_at(45.0, 9.0, "2024-10-18T08:00:00")];
        store.persist(&original).await.unwrap();

        // The same key twice violates the unique constraint half way through the rewrite.
        let duplicated = vec![
            fix_at(46.0, 10.0, "2024-10-18T09:00:00"),
            fix_at(46.0, 10.0, "2024-10-18T09:00:00"),
        ];
        assert!(store.persist(&duplicated).await.is_err());

        assert_eq!(store.load().await.unwrap(), original);
    }
}
