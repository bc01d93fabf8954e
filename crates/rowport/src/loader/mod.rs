//! Dependency-ordered loading of rows into a store.
//!
//! Rows arrive in any order. A row whose foreign keys point at rows that are
//! not committed yet is deferred, and inserted as soon as the last of them is.
//! When the store generates key values (identity columns), references to
//! those rows are rewritten to the generated values before insertion.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rowport::{DataReader, Loader, LoaderOptions, MemoryStore, Schema};
//!
//! # async fn run() -> rowport::Result<()> {
//! let schema = Arc::new(Schema::load("schema.yaml")?);
//! let store = MemoryStore::new(Arc::clone(&schema));
//! let mut loader = Loader::new(store, Arc::clone(&schema), LoaderOptions::default());
//!
//! loader.start()?;
//! for row in DataReader::open("data.xml", schema)? {
//!     loader.submit(row?).await?;
//! }
//! let stats = loader.end().await?;
//! println!("{} rows inserted", stats.rows_inserted);
//! # Ok(())
//! # }
//! ```

pub mod identity;
pub mod pending;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::core::{DataSink, Row, Schema, StoreAdapter, Table, Value};
use crate::error::{Result, RowportError};

pub use identity::Identity;
pub use pending::{PendingRow, PendingSet};

/// What to do when the store rejects a row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Stop the load and return the error.
    #[default]
    Halt,
    /// Log the error and carry on as if the row had been inserted.
    Continue,
}

/// Loader settings.
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Rows per `insert_batch` call; 1 inserts row by row.
    pub batch_size: usize,
    pub error_policy: ErrorPolicy,
    /// Match row table names against the schema case-sensitively.
    pub case_sensitive: bool,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            batch_size: 1,
            error_policy: ErrorPolicy::Halt,
            case_sensitive: false,
        }
    }
}

/// Counters for one load session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    pub rows_submitted: u64,
    pub rows_inserted: u64,
    /// Rows that had to wait for a referenced row at least once.
    pub rows_deferred: u64,
    /// Rows the store rejected under [`ErrorPolicy::Continue`].
    pub rows_failed: u64,
    pub batches_flushed: u64,
}

/// Key values a referenced row was committed with, by the identity it was submitted with.
type CommittedSet = HashMap<Identity, BTreeMap<String, Value>>;

/// A row on its way to the store.
///
/// `keys` are the identities other rows may refer to it by, taken from the
/// row as submitted. Rewriting its own references to generated key values
/// does not change them.
#[derive(Debug)]
struct Staged {
    row: Row,
    keys: Vec<Identity>,
}

/// Inserts rows into a store in foreign key dependency order.
pub struct Loader<S: StoreAdapter> {
    store: S,
    schema: Arc<Schema>,
    options: LoaderOptions,
    /// Referenced column sets per referenced table.
    referenced: HashMap<String, Vec<Vec<String>>>,
    /// Committed identities per referenced table.
    committed: HashMap<String, CommittedSet>,
    pending: PendingSet,
    /// Rows whose references are all resolved, awaiting insertion.
    ready: VecDeque<Staged>,
    /// Batch being collected, all of one table.
    queue: Vec<Staged>,
    /// Identities of queued rows that other rows may reference.
    queued: HashSet<Identity>,
    next_seq: u64,
    stats: LoadStats,
}

impl<S: StoreAdapter> Loader<S> {
    pub fn new(store: S, schema: Arc<Schema>, options: LoaderOptions) -> Self {
        let mut loader = Self {
            store,
            schema,
            options,
            referenced: HashMap::new(),
            committed: HashMap::new(),
            pending: PendingSet::new(),
            ready: VecDeque::new(),
            queue: Vec::new(),
            queued: HashSet::new(),
            next_seq: 0,
            stats: LoadStats::default(),
        };
        loader.reset();
        loader
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn stats(&self) -> &LoadStats {
        &self.stats
    }

    /// Number of rows currently deferred.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Begin a session, discarding all state of a previous one.
    pub fn start(&mut self) -> Result<()> {
        if self.options.batch_size == 0 {
            return Err(RowportError::Config("batch size must be at least 1".into()));
        }
        self.reset();
        debug!(
            "Loader started: batch size {}, tracking {} referenced table(s)",
            self.options.batch_size,
            self.referenced.len()
        );
        Ok(())
    }

    fn reset(&mut self) {
        self.referenced.clear();
        self.committed.clear();
        for table in &self.schema.tables {
            for fk in &table.foreign_keys {
                let sets = self.referenced.entry(fk.ref_table.clone()).or_default();
                if !sets.contains(&fk.ref_columns) {
                    sets.push(fk.ref_columns.clone());
                }
                self.committed.entry(fk.ref_table.clone()).or_default();
            }
        }
        self.pending.clear();
        self.ready.clear();
        self.queue.clear();
        self.queued.clear();
        self.next_seq = 0;
        self.stats = LoadStats::default();
    }

    /// Submit one row. It is inserted now, queued for a batch, or deferred.
    pub async fn submit(&mut self, row: Row) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        let table = schema
            .find_table(&row.table, self.options.case_sensitive)
            .ok_or_else(|| {
                RowportError::Schema(format!("row of unknown table {}", row.table))
            })?;
        let mut row = row;
        row.table = table.name.clone();

        let seq = self.next_seq;
        self.next_seq += 1;
        self.stats.rows_submitted += 1;
        let keys = self.keys_of(&row);

        let mut unresolved = Vec::new();
        for (index, fk) in table.foreign_keys.iter().enumerate() {
            let Some(target) = Identity::of_reference(&row, fk, index) else {
                continue;
            };
            match self.committed_values(&target) {
                Some(values) => {
                    let values = values.clone();
                    rewrite_reference(table, &mut row, &target, &values);
                }
                None => unresolved.push(target),
            }
        }

        if unresolved.is_empty() {
            self.ready.push_back(Staged { row, keys });
        } else {
            let waits_on_queue = unresolved.iter().any(|id| self.queued.contains(id));
            debug!(
                "Deferring {} row #{} until {} committed",
                table.name,
                seq,
                unresolved
                    .iter()
                    .map(Identity::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            self.stats.rows_deferred += 1;
            self.pending.insert(PendingRow {
                seq,
                row,
                keys,
                unresolved,
            });
            if waits_on_queue {
                self.flush().await?;
            }
        }

        self.drain().await
    }

    /// Finish the session: flush queued rows, commit, and report rows that
    /// are still waiting for referenced rows.
    pub async fn end(&mut self) -> Result<LoadStats> {
        self.drain().await?;
        while !self.queue.is_empty() {
            self.flush().await?;
            self.drain().await?;
        }

        if !self.pending.is_empty() {
            let mut identities: Vec<String> = Vec::new();
            for pending in self.pending.iter() {
                for id in &pending.unresolved {
                    let id = id.to_string();
                    if !identities.contains(&id) {
                        identities.push(id);
                    }
                }
            }
            let count = self.pending.len();
            warn!(
                "{} row(s) still waiting for referenced rows at end of load",
                count
            );
            return Err(RowportError::UnresolvedRows { count, identities });
        }

        info!(
            "Load finished: {} submitted, {} inserted, {} deferred, {} failed",
            self.stats.rows_submitted,
            self.stats.rows_inserted,
            self.stats.rows_deferred,
            self.stats.rows_failed
        );
        Ok(self.stats.clone())
    }

    /// Identities `row` can be referenced by, one per referenced column set.
    fn keys_of(&self, row: &Row) -> Vec<Identity> {
        self.referenced
            .get(&row.table)
            .map(|sets| {
                sets.iter()
                    .filter_map(|columns| Identity::of_row(row, columns))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn committed_values(&self, target: &Identity) -> Option<&BTreeMap<String, Value>> {
        self.committed.get(target.table())?.get(target)
    }

    /// Insert every ready row, including rows released along the way.
    async fn drain(&mut self) -> Result<()> {
        while let Some(staged) = self.ready.pop_front() {
            if self.options.batch_size > 1 {
                self.enqueue(staged).await?;
            } else {
                self.insert_one(staged).await?;
            }
        }
        Ok(())
    }

    async fn insert_one(&mut self, staged: Staged) -> Result<()> {
        let Staged { row, keys } = staged;
        let schema = Arc::clone(&self.schema);
        let table = self.table_of(&schema, &row)?;

        let stored = match self.store.insert(table, row.clone()).await {
            Ok(stored) => {
                if !self.store.is_autocommit() {
                    self.store.commit().await?;
                }
                self.stats.rows_inserted += 1;
                stored
            }
            Err(e) => {
                self.handle_failure(&table.name, 1, e)?;
                row.clone()
            }
        };
        self.record_commit(table, &keys, &row, &stored);
        Ok(())
    }

    async fn enqueue(&mut self, staged: Staged) -> Result<()> {
        if self
            .queue
            .first()
            .is_some_and(|q| q.row.table != staged.row.table)
        {
            self.flush().await?;
        }
        self.queued.extend(staged.keys.iter().cloned());
        self.queue.push(staged);
        if self.queue.len() >= self.options.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Insert the queued batch. Released rows go to the ready queue.
    async fn flush(&mut self) -> Result<()> {
        if self.queue.is_empty() {
            return Ok(());
        }
        let (rows, keys): (Vec<Row>, Vec<Vec<Identity>>) = std::mem::take(&mut self.queue)
            .into_iter()
            .map(|staged| (staged.row, staged.keys))
            .unzip();
        self.queued.clear();

        let schema = Arc::clone(&self.schema);
        let table = self.table_of(&schema, &rows[0])?;
        let count = rows.len();
        debug!("Flushing batch of {} {} row(s)", count, table.name);

        let result = match self.store.insert_batch(table, rows.clone()).await {
            Ok(stored) if stored.len() != count => Err(RowportError::store(
                &table.name,
                format!("batch of {} rows returned {} rows", count, stored.len()),
            )),
            other => other,
        };
        let stored = match result {
            Ok(stored) => {
                if !self.store.is_autocommit() {
                    self.store.commit().await?;
                }
                self.stats.rows_inserted += count as u64;
                stored
            }
            Err(e) => {
                self.handle_failure(&table.name, count, e)?;
                rows.clone()
            }
        };
        self.stats.batches_flushed += 1;

        for ((row, keys), stored) in rows.iter().zip(&keys).zip(&stored) {
            self.record_commit(table, keys, row, stored);
        }
        Ok(())
    }

    fn table_of<'a>(&self, schema: &'a Schema, row: &Row) -> Result<&'a Table> {
        schema
            .find_table(&row.table, true)
            .ok_or_else(|| RowportError::Schema(format!("row of unknown table {}", row.table)))
    }

    /// Apply the error policy to a store failure covering `count` rows.
    fn handle_failure(&mut self, table: &str, count: usize, err: RowportError) -> Result<()> {
        if !err.is_store_error() || self.options.error_policy == ErrorPolicy::Halt {
            return Err(err);
        }
        error!("Insert of {} {} row(s) failed: {}", count, table, err);
        warn!(
            "Continuing after failed insert; rows referencing the failed {} row(s) will still be submitted",
            table
        );
        self.stats.rows_failed += count as u64;
        Ok(())
    }

    /// Record a committed row under the identities it was submitted with
    /// and release the rows waiting on them.
    ///
    /// `sent` is the row as handed to the store; `stored` is what the store
    /// returned.
    fn record_commit(&mut self, table: &Table, keys: &[Identity], sent: &Row, stored: &Row) {
        let mut resolved = Vec::with_capacity(keys.len());
        for id in keys {
            let values: BTreeMap<String, Value> = id
                .values()
                .keys()
                .map(|c| {
                    let value = stored
                        .get_non_null(c)
                        .or_else(|| sent.get(c))
                        .cloned()
                        .unwrap_or(Value::Null);
                    (c.clone(), value)
                })
                .collect();
            resolved.push((id.clone(), values));
        }

        let schema = Arc::clone(&self.schema);
        for (id, values) in resolved {
            if let Some(set) = self.committed.get_mut(&table.name) {
                if set.insert(id.clone(), values.clone()).is_some() {
                    warn!("Identity {} was committed more than once", id);
                }
            }
            if !self.pending.is_waiting_on(&id) {
                continue;
            }
            let released = self.pending.resolve(&id, |row, entry| {
                if let Some(child) = schema.find_table(&row.table, true) {
                    rewrite_reference(child, row, entry, &values);
                }
            });
            for pending in released {
                debug!("Releasing {} row #{} after {}", pending.row.table, pending.seq, id);
                self.ready.push_back(Staged {
                    row: pending.row,
                    keys: pending.keys,
                });
            }
        }
    }
}

/// Point the foreign key `target` was derived from at the committed key values.
fn rewrite_reference(
    table: &Table,
    row: &mut Row,
    target: &Identity,
    committed: &BTreeMap<String, Value>,
) {
    let Some(fk) = target.foreign_key().and_then(|i| table.foreign_keys.get(i)) else {
        return;
    };
    for (local, referenced) in fk.references() {
        if let Some(value) = committed.get(referenced) {
            row.set(local, value.clone());
        }
    }
}

#[async_trait]
impl<S: StoreAdapter> DataSink for Loader<S> {
    async fn start(&mut self) -> Result<()> {
        Loader::start(self)
    }

    async fn add_row(&mut self, row: Row) -> Result<()> {
        self.submit(row).await
    }

    async fn end(&mut self) -> Result<()> {
        Loader::end(self).await.map(|_| ())
    }
}
