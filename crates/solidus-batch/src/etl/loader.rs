//! Batched, conflict-ignoring writes into the destination

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;

use super::error::{MigrationError, MigrationResult};
use super::schema::EntityDef;
use super::transform::Entity;
use super::value::FieldValue;

/// Default number of entities per insert statement
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Write side of the destination database
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Current values of the rows with the given primary keys, in field order
    async fn existing(
        &self,
        def: &'static EntityDef,
        keys: &[i64],
    ) -> MigrationResult<HashMap<i64, Vec<FieldValue>>>;

    /// Insert in one transaction, ignoring primary key conflicts.
    /// Returns the number of rows actually inserted.
    async fn insert_ignore(&self, def: &'static EntityDef, rows: &[Entity]) -> Result<u64, sqlx::Error>;
}

/// What to do when a batch insert fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchFailurePolicy {
    /// Stop the run
    #[default]
    Abort,
    /// Abandon the rest of the table and continue with the next one
    SkipTable,
    /// Bisect the batch down to single rows and keep what inserts
    Isolate,
}

impl BatchFailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchFailurePolicy::Abort => "abort",
            BatchFailurePolicy::SkipTable => "skip-table",
            BatchFailurePolicy::Isolate => "isolate",
        }
    }
}

impl FromStr for BatchFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "abort" => Ok(BatchFailurePolicy::Abort),
            "skip-table" | "skip_table" | "skip" => Ok(BatchFailurePolicy::SkipTable),
            "isolate" => Ok(BatchFailurePolicy::Isolate),
            other => Err(format!(
                "unknown batch failure policy '{}' (expected abort, skip-table or isolate)",
                other
            )),
        }
    }
}

/// Per-table write counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub new: u64,
    pub unchanged: u64,
    pub conflicting: u64,
    pub failed: u64,
    pub batches: u64,
}

/// Accumulates entities for one table and flushes them in batches
pub struct BatchLoader<'a> {
    store: &'a dyn DestinationStore,
    def: &'static EntityDef,
    batch_size: usize,
    policy: BatchFailurePolicy,
    pending: Vec<Entity>,
    stats: LoadStats,
}

impl<'a> BatchLoader<'a> {
    pub fn new(
        store: &'a dyn DestinationStore,
        def: &'static EntityDef,
        batch_size: usize,
        policy: BatchFailurePolicy,
    ) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            def,
            batch_size,
            policy,
            pending: Vec::with_capacity(batch_size),
            stats: LoadStats::default(),
        }
    }

    pub fn stats(&self) -> LoadStats {
        self.stats
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Queue an entity, flushing when the batch is full
    pub async fn add(&mut self, entity: Entity) -> MigrationResult<()> {
        self.pending.push(entity);
        if self.pending.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Write whatever is queued
    pub async fn flush(&mut self) -> MigrationResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.pending);
        self.stats.batches += 1;

        let keys: Vec<i64> = batch.iter().map(Entity::primary_key).collect();
        let existing = self.store.existing(self.def, &keys).await?;

        let mut candidates = Vec::with_capacity(batch.len());
        for entity in batch {
            match existing.get(&entity.primary_key()) {
                None => candidates.push(entity),
                Some(current) if same_values(current, &entity.values) => self.stats.unchanged += 1,
                Some(_) => {
                    tracing::debug!(
                        table = self.def.table,
                        key = entity.primary_key(),
                        "Existing row differs, left untouched"
                    );
                    self.stats.conflicting += 1;
                }
            }
        }

        if candidates.is_empty() {
            return Ok(());
        }

        let (inserted, failed) = match self.store.insert_ignore(self.def, &candidates).await {
            Ok(inserted) => (inserted, 0),
            Err(e) if self.policy == BatchFailurePolicy::Isolate => {
                tracing::warn!(
                    table = self.def.table,
                    rows = candidates.len(),
                    error = %e,
                    "Batch insert failed, isolating rows"
                );
                self.isolate(&candidates).await
            }
            Err(e) => return Err(MigrationError::batch_insert(self.def.table, e)),
        };

        self.stats.new += inserted;
        self.stats.failed += failed;
        // Keys duplicated within the batch or inserted concurrently
        self.stats.conflicting += (candidates.len() as u64).saturating_sub(inserted + failed);

        tracing::debug!(
            table = self.def.table,
            inserted,
            failed,
            "Batch flushed"
        );

        Ok(())
    }

    /// Insert halves of a failing batch until single rows remain
    async fn isolate(&self, rows: &[Entity]) -> (u64, u64) {
        let mut inserted = 0;
        let mut failed = 0;
        let mut ranges = vec![(0, rows.len() / 2), (rows.len() / 2, rows.len())];

        while let Some((start, end)) = ranges.pop() {
            if start >= end {
                continue;
            }
            let slice = &rows[start..end];
            match self.store.insert_ignore(self.def, slice).await {
                Ok(n) => inserted += n,
                Err(e) if slice.len() == 1 => {
                    failed += 1;
                    tracing::error!(
                        table = self.def.table,
                        key = slice[0].primary_key(),
                        error = %e,
                        "Row failed to insert"
                    );
                }
                Err(_) => {
                    let mid = start + slice.len() / 2;
                    ranges.push((mid, end));
                    ranges.push((start, mid));
                }
            }
        }

        (inserted, failed)
    }
}

fn same_values(current: &[FieldValue], incoming: &[FieldValue]) -> bool {
    current.len() == incoming.len()
        && current
            .iter()
            .zip(incoming)
            .all(|(a, b)| a.clone().trimmed() == b.clone().trimmed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::schema::resolve;
    use std::sync::Mutex;

    /// Store that rejects any batch containing a poisoned key
    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<HashMap<i64, Vec<FieldValue>>>,
        poisoned: Vec<i64>,
        insert_calls: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl DestinationStore for MemoryStore {
        async fn existing(
            &self,
            _def: &'static EntityDef,
            keys: &[i64],
        ) -> MigrationResult<HashMap<i64, Vec<FieldValue>>> {
            let rows = self.rows.lock().unwrap();
            Ok(keys
                .iter()
                .filter_map(|k| rows.get(k).map(|v| (*k, v.clone())))
                .collect())
        }

        async fn insert_ignore(&self, _def: &'static EntityDef, batch: &[Entity]) -> Result<u64, sqlx::Error> {
            self.insert_calls.lock().unwrap().push(batch.len());
            if batch.iter().any(|e| self.poisoned.contains(&e.primary_key())) {
                return Err(sqlx::Error::Protocol("value too long".into()));
            }
            let mut rows = self.rows.lock().unwrap();
            let mut inserted = 0;
            for entity in batch {
                if !rows.contains_key(&entity.primary_key()) {
                    rows.insert(entity.primary_key(), entity.values.clone());
                    inserted += 1;
                }
            }
            Ok(inserted)
        }
    }

    fn category(id: i64, name: &str) -> Entity {
        Entity {
            def: resolve("Categories").unwrap(),
            values: vec![FieldValue::Int(id), FieldValue::from(name)],
        }
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("abort".parse::<BatchFailurePolicy>(), Ok(BatchFailurePolicy::Abort));
        assert_eq!("skip-table".parse::<BatchFailurePolicy>(), Ok(BatchFailurePolicy::SkipTable));
        assert_eq!("ISOLATE".parse::<BatchFailurePolicy>(), Ok(BatchFailurePolicy::Isolate));
        assert!("retry".parse::<BatchFailurePolicy>().is_err());
        assert_eq!(BatchFailurePolicy::default(), BatchFailurePolicy::Abort);
    }

    #[tokio::test]
    async fn test_flushes_at_threshold_and_on_demand() {
        let store = MemoryStore::default();
        let def = resolve("Categories").unwrap();
        let mut loader = BatchLoader::new(&store, def, 3, BatchFailurePolicy::Abort);

        for id in 1..=7 {
            loader.add(category(id, "Brakes")).await.unwrap();
        }
        assert_eq!(loader.pending(), 1);
        loader.flush().await.unwrap();

        assert_eq!(*store.insert_calls.lock().unwrap(), vec![3, 3, 1]);
        assert_eq!(loader.stats().new, 7);
        assert_eq!(loader.stats().batches, 3);
    }

    #[tokio::test]
    async fn test_classifies_existing_rows() {
        let store = MemoryStore::default();
        store
            .rows
            .lock()
            .unwrap()
            .insert(1, vec![FieldValue::Int(1), FieldValue::from("Brakes")]);
        store
            .rows
            .lock()
            .unwrap()
            .insert(2, vec![FieldValue::Int(2), FieldValue::from("Old Name")]);

        let def = resolve("Categories").unwrap();
        let mut loader = BatchLoader::new(&store, def, DEFAULT_BATCH_SIZE, BatchFailurePolicy::Abort);
        loader.add(category(1, "Brakes")).await.unwrap();
        loader.add(category(2, "Engine")).await.unwrap();
        loader.add(category(3, "Lighting")).await.unwrap();
        loader.flush().await.unwrap();

        let stats = loader.stats();
        assert_eq!((stats.new, stats.unchanged, stats.conflicting), (1, 1, 1));
        // Conflicting row is never overwritten
        assert_eq!(
            store.rows.lock().unwrap()[&2][1],
            FieldValue::from("Old Name")
        );
    }

    #[tokio::test]
    async fn test_duplicate_keys_in_one_batch_count_as_conflicting() {
        let store = MemoryStore::default();
        let def = resolve("Categories").unwrap();
        let mut loader = BatchLoader::new(&store, def, DEFAULT_BATCH_SIZE, BatchFailurePolicy::Abort);
        loader.add(category(1, "Brakes")).await.unwrap();
        loader.add(category(1, "Brakes again")).await.unwrap();
        loader.flush().await.unwrap();

        assert_eq!(loader.stats().new, 1);
        assert_eq!(loader.stats().conflicting, 1);
    }

    #[tokio::test]
    async fn test_abort_policy_surfaces_error() {
        let store = MemoryStore {
            poisoned: vec![2],
            ..Default::default()
        };
        let def = resolve("Categories").unwrap();
        let mut loader = BatchLoader::new(&store, def, DEFAULT_BATCH_SIZE, BatchFailurePolicy::Abort);
        loader.add(category(1, "Brakes")).await.unwrap();
        loader.add(category(2, "Engine")).await.unwrap();

        let err = loader.flush().await.unwrap_err();
        assert!(matches!(err, MigrationError::BatchInsert { .. }));
        assert!(store.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_isolate_policy_keeps_good_rows() {
        let store = MemoryStore {
            poisoned: vec![3],
            ..Default::default()
        };
        let def = resolve("Categories").unwrap();
        let mut loader = BatchLoader::new(&store, def, DEFAULT_BATCH_SIZE, BatchFailurePolicy::Isolate);
        for id in 1..=5 {
            loader.add(category(id, "Part")).await.unwrap();
        }
        loader.flush().await.unwrap();

        let stats = loader.stats();
        assert_eq!(stats.new, 4);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.conflicting, 0);
        assert!(!store.rows.lock().unwrap().contains_key(&3));
    }
}
