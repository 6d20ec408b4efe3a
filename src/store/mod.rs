//! Transactional row store shared by the registry and the tracker
//!
//! The store is the only synchronisation boundary in the system: every
//! mutation runs inside `transact`, which applies the closure atomically and
//! serialises concurrent writers. Returning `Err` from the closure rolls the
//! whole transaction back.

pub mod memory;
pub mod retry;
#[cfg(feature = "database")]
pub mod sqlite;
pub mod table;

use async_trait::async_trait;

use crate::errors::{CoordinationError, Result};
use crate::ownership::types::{Employee, FileLock, FileRequest};
use crate::progress::types::TaskRecord;

pub use memory::MemoryStore;
pub use retry::{RetryConfig, StoreRetry};
#[cfg(feature = "database")]
pub use sqlite::SqliteStore;
pub use table::{Journal, Table};

/// All rows held by the store
///
/// Active locks are keyed by file path, so two locks on the same path cannot
/// coexist. Writes are journaled per row until the store commits or rolls
/// back, so neither costs more than the rows a transaction touched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreTables {
    pub employees: Table<String, Employee>,
    pub locks: Table<String, FileLock>,
    pub requests: Table<u64, FileRequest>,
    /// Active (non-terminal) task records keyed by employee
    pub tasks: Table<String, TaskRecord>,
    /// Archived task records, oldest first
    pub task_history: Journal<TaskRecord>,
    pub next_id: u64,
    committed_next_id: u64,
}

/// Keys written by the open transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub employees: Vec<String>,
    pub locks: Vec<String>,
    pub requests: Vec<u64>,
    pub tasks: Vec<String>,
    pub history: std::ops::Range<usize>,
    pub next_id: bool,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.employees.is_empty()
            && self.locks.is_empty()
            && self.requests.is_empty()
            && self.tasks.is_empty()
            && self.history.is_empty()
            && !self.next_id
    }
}

impl StoreTables {
    /// Tables loaded from a backend, with nothing pending
    pub fn restored(
        employees: Table<String, Employee>,
        locks: Table<String, FileLock>,
        requests: Table<u64, FileRequest>,
        tasks: Table<String, TaskRecord>,
        task_history: Journal<TaskRecord>,
        next_id: u64,
    ) -> Self {
        Self {
            employees,
            locks,
            requests,
            tasks,
            task_history,
            next_id,
            committed_next_id: next_id,
        }
    }

    pub fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn locks_owned_by(&self, owner: &str) -> Vec<&FileLock> {
        self.locks.values().filter(|lock| lock.owner == owner).collect()
    }

    pub fn changes(&self) -> ChangeSet {
        ChangeSet {
            employees: self.employees.touched().cloned().collect(),
            locks: self.locks.touched().cloned().collect(),
            requests: self.requests.touched().copied().collect(),
            tasks: self.tasks.touched().cloned().collect(),
            history: self.task_history.appended(),
            next_id: self.next_id != self.committed_next_id,
        }
    }

    pub(crate) fn commit(&mut self) {
        self.employees.commit();
        self.locks.commit();
        self.requests.commit();
        self.tasks.commit();
        self.task_history.commit();
        self.committed_next_id = self.next_id;
    }

    pub(crate) fn rollback(&mut self) {
        self.employees.rollback();
        self.locks.rollback();
        self.requests.rollback();
        self.tasks.rollback();
        self.task_history.rollback();
        self.next_id = self.committed_next_id;
    }
}

pub type Transaction<'a> = Box<dyn FnOnce(&mut StoreTables) -> Result<()> + Send + 'a>;
pub type Inspection<'a> = Box<dyn FnOnce(&StoreTables) + Send + 'a>;

#[async_trait]
pub trait TransactionalStore: Send + Sync {
    /// Apply `tx` atomically; on `Err` nothing it did is kept
    async fn transact<'a>(&self, tx: Transaction<'a>) -> Result<()>;

    /// Read a consistent view without writing
    async fn inspect<'a>(&self, read: Inspection<'a>) -> Result<()>;
}

impl dyn TransactionalStore {
    /// Run a transaction that produces a value
    pub async fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(&mut StoreTables) -> Result<T> + Send,
    {
        let mut output = None;
        self.transact(Box::new(|tables: &mut StoreTables| {
            output = Some(f(tables)?);
            Ok(())
        }))
        .await?;
        output.ok_or_else(|| CoordinationError::Store("transaction produced no result".to_string()))
    }

    pub async fn read<T, F>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(&StoreTables) -> T + Send,
    {
        let mut output = None;
        self.inspect(Box::new(|tables: &StoreTables| {
            output = Some(f(tables));
        }))
        .await?;
        output.ok_or_else(|| CoordinationError::Store("read produced no result".to_string()))
    }
}
