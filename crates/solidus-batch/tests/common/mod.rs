//! In-memory stand-ins for the database and tool seams
//!
//! Every integration test gets fresh doubles, so tests stay isolated and need
//! neither MySQL, PostgreSQL nor ImageMagick. The doubles mirror the SQL
//! semantics of the real stores (conflict-ignoring inserts, guarded task
//! transitions) closely enough to exercise the orchestration code.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use solidus_batch::assets::processor::variant_path;
use solidus_batch::assets::{
    AssetError, AssetFile, AssetRepository, ImageProcessor, ProcessedImage,
};
use solidus_batch::categories::{
    Category, CategoryResult, CategorySource, CategoryStore, NewCategory,
};
use solidus_batch::etl::{
    DestinationStore, Entity, EntityDef, FieldValue, MigrationError, MigrationResult,
    RelationLookup, SourceReader, SourceRow,
};
use solidus_batch::tasks::{
    ClaimFilter, NewTask, Task, TaskError, TaskResult, TaskStatus, TaskStore,
};

// ============================================================================
// Migration source and destination
// ============================================================================

/// Source database holding tables in insertion order
#[derive(Default)]
pub struct MemorySource {
    tables: Vec<(String, Vec<SourceRow>)>,
    reads: Mutex<Vec<String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(mut self, name: &str, rows: Vec<SourceRow>) -> Self {
        self.tables.push((name.to_string(), rows));
        self
    }

    /// Tables read so far, in read order
    pub fn reads(&self) -> Vec<String> {
        self.reads.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceReader for MemorySource {
    async fn tables(&self) -> MigrationResult<Vec<String>> {
        Ok(self.tables.iter().map(|(name, _)| name.clone()).collect())
    }

    async fn read_table(&self, table: &str) -> MigrationResult<Vec<SourceRow>> {
        self.reads.lock().unwrap().push(table.to_string());
        self.tables
            .iter()
            .find(|(name, _)| name == table)
            .map(|(_, rows)| rows.clone())
            .ok_or_else(|| MigrationError::source_read(table, sqlx::Error::RowNotFound))
    }
}

/// Destination keyed by table then primary key
#[derive(Default)]
pub struct MemoryDestination {
    rows: Mutex<HashMap<&'static str, BTreeMap<i64, Vec<FieldValue>>>>,
    /// Inserting any of these `(table, key)` pairs fails the whole batch
    poisoned: HashSet<(&'static str, i64)>,
    insert_calls: AtomicUsize,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poison(mut self, table: &'static str, key: i64) -> Self {
        self.poisoned.insert((table, key));
        self
    }

    /// Place a row directly, bypassing the loader
    pub fn seed(&self, def: &'static EntityDef, values: Vec<FieldValue>) {
        let key = Entity { def, values: values.clone() }.primary_key();
        self.rows
            .lock()
            .unwrap()
            .entry(def.table)
            .or_default()
            .insert(key, values);
    }

    pub fn count(&self, table: &str) -> usize {
        self.rows.lock().unwrap().get(table).map_or(0, BTreeMap::len)
    }

    pub fn row(&self, table: &str, key: i64) -> Option<Vec<FieldValue>> {
        self.rows
            .lock()
            .unwrap()
            .get(table)
            .and_then(|rows| rows.get(&key).cloned())
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DestinationStore for MemoryDestination {
    async fn existing(
        &self,
        def: &'static EntityDef,
        keys: &[i64],
    ) -> MigrationResult<HashMap<i64, Vec<FieldValue>>> {
        let rows = self.rows.lock().unwrap();
        let Some(table) = rows.get(def.table) else {
            return Ok(HashMap::new());
        };
        Ok(keys
            .iter()
            .filter_map(|k| table.get(k).map(|v| (*k, v.clone())))
            .collect())
    }

    async fn insert_ignore(&self, def: &'static EntityDef, batch: &[Entity]) -> Result<u64, sqlx::Error> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if batch
            .iter()
            .any(|e| self.poisoned.contains(&(def.table, e.primary_key())))
        {
            return Err(sqlx::Error::Protocol(
                "value too long for type character varying(100)".into(),
            ));
        }

        let mut rows = self.rows.lock().unwrap();
        let table = rows.entry(def.table).or_default();
        let mut inserted = 0;
        for entity in batch {
            if !table.contains_key(&entity.primary_key()) {
                table.insert(entity.primary_key(), entity.values.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}

#[async_trait]
impl RelationLookup for MemoryDestination {
    async fn exists(&self, entity: &'static EntityDef, key: i64) -> MigrationResult<bool> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(entity.table)
            .is_some_and(|rows| rows.contains_key(&key)))
    }
}

// ============================================================================
// Task queue
// ============================================================================

#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<Vec<Task>>,
    heartbeats: AtomicUsize,
    /// `complete` calls that fail with a pool timeout before touching the task
    failing_completes: AtomicUsize,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a task as-is, for fixtures in states `enqueue` cannot produce
    pub fn put(&self, task: Task) {
        self.tasks.lock().unwrap().push(task);
    }

    pub fn task(&self, task_id: Uuid) -> Task {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.task_id == task_id)
            .cloned()
            .unwrap()
    }

    pub fn heartbeats(&self) -> usize {
        self.heartbeats.load(Ordering::SeqCst)
    }

    pub fn fail_next_completes(&self, count: usize) {
        self.failing_completes.store(count, Ordering::SeqCst);
    }

    /// Pretend another actor took the task over
    pub fn steal(&self, task_id: Uuid, worker_id: &str) {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(task) = tasks.iter_mut().find(|t| t.task_id == task_id) {
            task.worker_id = Some(worker_id.to_string());
        }
    }

    fn finish(
        &self,
        task_id: Uuid,
        worker_id: &str,
        apply: impl FnOnce(&mut Task),
    ) -> bool {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.iter_mut().find(|t| {
            t.task_id == task_id
                && t.status == TaskStatus::Processing
                && t.worker_id.as_deref() == Some(worker_id)
        }) {
            Some(task) => {
                apply(task);
                task.completed_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }
}

/// A pending task as `enqueue` would create it
pub fn pending_task(task_type: &str, data: serde_json::Value, priority: i32, created_at: DateTime<Utc>) -> Task {
    Task {
        task_id: Uuid::new_v4(),
        task_type: task_type.to_string(),
        task_data: data,
        priority,
        status: TaskStatus::Pending,
        attempts: 0,
        max_attempts: 3,
        created_at,
        scheduled_for: created_at,
        started_at: None,
        completed_at: None,
        result: None,
        error_message: None,
        worker_id: None,
        heartbeat_at: None,
    }
}

fn claim(task: &mut Task, worker_id: &str, now: DateTime<Utc>) {
    task.status = TaskStatus::Processing;
    task.worker_id = Some(worker_id.to_string());
    task.started_at = Some(now);
    task.heartbeat_at = Some(now);
    task.attempts += 1;
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn enqueue(&self, task: NewTask) -> TaskResult<Task> {
        let now = Utc::now();
        let mut created = pending_task(&task.task_type, task.task_data, task.priority, now);
        created.scheduled_for = task.scheduled_for.unwrap_or(now);
        self.put(created.clone());
        Ok(created)
    }

    async fn get(&self, task_id: Uuid) -> TaskResult<Option<Task>> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.task_id == task_id)
            .cloned())
    }

    async fn claim_due(
        &self,
        filter: &ClaimFilter,
        worker_id: &str,
        limit: i64,
        now: DateTime<Utc>,
    ) -> TaskResult<Vec<Task>> {
        let mut tasks = self.tasks.lock().unwrap();
        let mut due: Vec<usize> = tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| {
                t.status == TaskStatus::Pending && t.scheduled_for <= now && filter.matches(&t.task_type)
            })
            .map(|(i, _)| i)
            .collect();
        due.sort_by(|a, b| {
            tasks[*a]
                .priority
                .cmp(&tasks[*b].priority)
                .then(tasks[*a].created_at.cmp(&tasks[*b].created_at))
        });
        due.truncate(usize::try_from(limit).unwrap_or(0));

        Ok(due
            .into_iter()
            .map(|i| {
                claim(&mut tasks[i], worker_id, now);
                tasks[i].clone()
            })
            .collect())
    }

    async fn claim_specific(
        &self,
        task_id: Uuid,
        filter: &ClaimFilter,
        worker_id: &str,
    ) -> TaskResult<Task> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .iter_mut()
            .find(|t| t.task_id == task_id && filter.matches(&t.task_type))
            .ok_or(TaskError::NotFound(task_id))?;
        if task.status != TaskStatus::Pending {
            return Err(TaskError::NotClaimable {
                task_id,
                status: task.status,
            });
        }
        claim(task, worker_id, Utc::now());
        Ok(task.clone())
    }

    async fn complete(
        &self,
        task_id: Uuid,
        worker_id: &str,
        result: serde_json::Value,
    ) -> TaskResult<bool> {
        let failing = self
            .failing_completes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(TaskError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(self.finish(task_id, worker_id, |task| {
            task.status = TaskStatus::Completed;
            task.result = Some(result);
            task.error_message = None;
        }))
    }

    async fn fail(&self, task_id: Uuid, worker_id: &str, error: &str) -> TaskResult<bool> {
        Ok(self.finish(task_id, worker_id, |task| {
            task.status = TaskStatus::Failed;
            task.error_message = Some(error.to_string());
        }))
    }

    async fn heartbeat(&self, task_id: Uuid, worker_id: &str) -> TaskResult<()> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(task) = tasks.iter_mut().find(|t| {
            t.task_id == task_id
                && t.status == TaskStatus::Processing
                && t.worker_id.as_deref() == Some(worker_id)
        }) {
            task.heartbeat_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn recover_orphans(&self, lease: Duration, now: DateTime<Utc>) -> TaskResult<Vec<Task>> {
        let cutoff = now - lease;
        let mut tasks = self.tasks.lock().unwrap();
        let mut recovered = Vec::new();
        for task in tasks.iter_mut() {
            let last_seen = task
                .heartbeat_at
                .or(task.started_at)
                .unwrap_or(task.created_at);
            if task.status == TaskStatus::Processing && last_seen < cutoff {
                task.status = TaskStatus::Failed;
                task.completed_at = Some(now);
                task.error_message = Some(format!(
                    "lease expired: worker {} stopped heartbeating",
                    task.worker_id.as_deref().unwrap_or("unknown")
                ));
                recovered.push(task.clone());
            }
        }
        Ok(recovered)
    }
}

// ============================================================================
// Assets
// ============================================================================

#[derive(Default)]
pub struct MemoryAssetRepository {
    files: Mutex<HashMap<i64, AssetFile>>,
    /// `mark_processed` fails with a pool timeout
    reject_processed: bool,
}

impl MemoryAssetRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, id: i64, asset_type: &str, file_path: &str) -> Self {
        self.files.lock().unwrap().insert(
            id,
            AssetFile {
                id,
                asset_id: id * 10,
                asset_title: format!("Asset {}", id),
                asset_type: asset_type.to_string(),
                file_path: file_path.to_string(),
                processed_path: None,
                thumbnail_path: None,
                is_processed: false,
                processing_status: "pending".to_string(),
                processing_error: None,
                width: None,
                height: None,
            },
        );
        self
    }

    pub fn rejecting_processed(mut self) -> Self {
        self.reject_processed = true;
        self
    }

    pub fn file(&self, id: i64) -> AssetFile {
        self.files.lock().unwrap().get(&id).cloned().unwrap()
    }

    fn update(&self, id: i64, apply: impl FnOnce(&mut AssetFile)) -> Result<(), AssetError> {
        let mut files = self.files.lock().unwrap();
        let file = files.get_mut(&id).ok_or(AssetError::NotFound(id))?;
        apply(file);
        Ok(())
    }
}

#[async_trait]
impl AssetRepository for MemoryAssetRepository {
    async fn find_file(&self, id: i64) -> Result<Option<AssetFile>, AssetError> {
        Ok(self.files.lock().unwrap().get(&id).cloned())
    }

    async fn mark_processing(&self, id: i64) -> Result<(), AssetError> {
        self.update(id, |file| {
            file.processing_status = "processing".to_string();
            file.processing_error = None;
        })
    }

    async fn mark_processed(&self, id: i64, processed: &ProcessedImage) -> Result<(), AssetError> {
        if self.reject_processed {
            return Err(AssetError::Database(sqlx::Error::PoolTimedOut));
        }
        self.update(id, |file| {
            file.processed_path = Some(processed.processed_path.clone());
            file.thumbnail_path = processed.thumbnail_path().map(str::to_string);
            file.width = processed.width;
            file.height = processed.height;
            file.is_processed = true;
            file.processing_status = "completed".to_string();
        })
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<(), AssetError> {
        self.update(id, |file| {
            file.processing_status = "failed".to_string();
            file.processing_error = Some(error.to_string());
        })
    }
}

/// Image processor that computes variant paths without touching files
#[derive(Default)]
pub struct FakeProcessor {
    /// When set, every call fails with this message
    pub failure: Option<String>,
    /// How long each call takes
    pub delay: Option<std::time::Duration>,
    pub calls: AtomicUsize,
}

impl FakeProcessor {
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn slow(delay: std::time::Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageProcessor for FakeProcessor {
    async fn process(&self, file_path: &str) -> Result<ProcessedImage, AssetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.failure {
            return Err(AssetError::processor("convert", message.clone()));
        }
        Ok(ProcessedImage {
            processed_path: variant_path(file_path, "_processed"),
            thumbnails: vec![
                ("small".to_string(), variant_path(file_path, "_thumb_small")),
                ("medium".to_string(), variant_path(file_path, "_thumb_medium")),
            ],
            width: Some(1024),
            height: Some(768),
        })
    }
}

// ============================================================================
// Categories
// ============================================================================

#[derive(Default)]
pub struct MemoryCategoryStore {
    categories: Mutex<BTreeMap<i64, Category>>,
    inserted: Mutex<Vec<NewCategory>>,
}

impl MemoryCategoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(categories: &BTreeMap<i64, Category>) -> i64 {
        categories.keys().next_back().map_or(1, |id| id + 1)
    }

    /// Seed an imported category whose parent is given by its PCAdb key
    pub fn with(
        self,
        source: CategorySource,
        pcadb_id: i64,
        name: &str,
        slug: &str,
        parent: Option<(CategorySource, i64)>,
    ) -> Self {
        {
            let mut categories = self.categories.lock().unwrap();
            let parent_id = parent.map(|key| {
                categories
                    .values()
                    .find(|c| c.source_key() == Some(key))
                    .map(|c| c.id)
                    .expect("seed parents before children")
            });
            let id = Self::next_id(&categories);
            categories.insert(
                id,
                Category {
                    id,
                    pcadb_source: Some(source.to_string()),
                    pcadb_id: Some(pcadb_id),
                    name: name.to_string(),
                    slug: slug.to_string(),
                    parent_id,
                },
            );
        }
        self
    }

    pub fn get(&self, source: CategorySource, pcadb_id: i64) -> Option<Category> {
        self.categories
            .lock()
            .unwrap()
            .values()
            .find(|c| c.source_key() == Some((source, pcadb_id)))
            .cloned()
    }

    /// PCAdb key of the category's parent
    pub fn parent_of(&self, source: CategorySource, pcadb_id: i64) -> Option<(CategorySource, i64)> {
        let parent_id = self.get(source, pcadb_id)?.parent_id?;
        self.categories
            .lock()
            .unwrap()
            .get(&parent_id)
            .and_then(Category::source_key)
    }

    pub fn len(&self) -> usize {
        self.categories.lock().unwrap().len()
    }

    pub fn inserted(&self) -> Vec<NewCategory> {
        self.inserted.lock().unwrap().clone()
    }
}

#[async_trait]
impl CategoryStore for MemoryCategoryStore {
    async fn all(&self) -> CategoryResult<Vec<Category>> {
        Ok(self.categories.lock().unwrap().values().cloned().collect())
    }

    async fn insert(&self, category: &NewCategory) -> CategoryResult<()> {
        self.inserted.lock().unwrap().push(category.clone());
        let mut categories = self.categories.lock().unwrap();
        let key = Some((category.source, category.pcadb_id));
        if categories.values().any(|c| c.source_key() == key) {
            return Ok(());
        }
        let id = Self::next_id(&categories);
        categories.insert(
            id,
            Category {
                id,
                pcadb_source: Some(category.source.to_string()),
                pcadb_id: Some(category.pcadb_id),
                name: category.name.clone(),
                slug: category.slug.clone(),
                parent_id: None,
            },
        );
        Ok(())
    }

    async fn rename(&self, id: i64, name: &str) -> CategoryResult<()> {
        if let Some(category) = self.categories.lock().unwrap().get_mut(&id) {
            category.name = name.to_string();
        }
        Ok(())
    }

    async fn set_parent(&self, id: i64, parent_id: i64) -> CategoryResult<()> {
        if let Some(category) = self.categories.lock().unwrap().get_mut(&id) {
            category.parent_id = Some(parent_id);
        }
        Ok(())
    }
}
