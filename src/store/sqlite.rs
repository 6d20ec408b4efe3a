//! SQLite write-through store
//!
//! Rows live in memory exactly as in `MemoryStore`; every committed
//! transaction writes the rows it touched to SQLite inside one SQL
//! transaction before it commits in memory. Rows are kept as JSON bodies
//! keyed by `(kind, key)`.

use async_trait::async_trait;
use sqlx::{migrate::MigrateDatabase, Row, SqlitePool};
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::info;

use super::{ChangeSet, Inspection, StoreTables, Transaction, TransactionalStore};
use crate::errors::{CoordinationError, Result};
use crate::progress::types::TaskRecord;

type RowKey = (String, String);

pub struct SqliteStore {
    pool: SqlitePool,
    tables: Mutex<StoreTables>,
}

impl SqliteStore {
    /// Open (creating if needed) the database and load every row
    pub async fn open(database_url: &str) -> Result<Self> {
        if !sqlx::Sqlite::database_exists(database_url).await? {
            info!("Creating coordination database at {}", database_url);
            sqlx::Sqlite::create_database(database_url).await?;
        }

        let pool = SqlitePool::connect(database_url).await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS warden_rows (
                kind TEXT NOT NULL,
                key TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (kind, key)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        let tables = Self::load(&pool).await?;
        info!(
            employees = tables.employees.len(),
            locks = tables.locks.len(),
            active_tasks = tables.tasks.len(),
            "Loaded coordination state from database"
        );

        Ok(Self {
            pool,
            tables: Mutex::new(tables),
        })
    }

    async fn load(pool: &SqlitePool) -> Result<StoreTables> {
        let rows = sqlx::query("SELECT kind, key, body FROM warden_rows ORDER BY kind, key")
            .fetch_all(pool)
            .await?;

        let mut employees = BTreeMap::new();
        let mut locks = BTreeMap::new();
        let mut requests = BTreeMap::new();
        let mut tasks = BTreeMap::new();
        let mut history: BTreeMap<u64, TaskRecord> = BTreeMap::new();
        let mut next_id = 0;
        for row in rows {
            let kind: String = row.get("kind");
            let key: String = row.get("key");
            let body: String = row.get("body");
            match kind.as_str() {
                "employee" => {
                    employees.insert(key, serde_json::from_str(&body)?);
                }
                "lock" => {
                    locks.insert(key, serde_json::from_str(&body)?);
                }
                "request" => {
                    requests.insert(parse_key(&key)?, serde_json::from_str(&body)?);
                }
                "task" => {
                    tasks.insert(key, serde_json::from_str(&body)?);
                }
                "history" => {
                    history.insert(parse_key(&key)?, serde_json::from_str(&body)?);
                }
                "meta" if key == "next_id" => {
                    next_id = serde_json::from_str(&body)?;
                }
                other => {
                    tracing::warn!(kind = other, key = %key, "Ignoring unknown row kind");
                }
            }
        }
        Ok(StoreTables::restored(
            employees.into_iter().collect(),
            locks.into_iter().collect(),
            requests.into_iter().collect(),
            tasks.into_iter().collect(),
            history.into_values().collect(),
            next_id,
        ))
    }

    /// Write the rows named by `changes` as they stand in `tables`
    async fn persist(&self, tables: &StoreTables, changes: &ChangeSet) -> Result<()> {
        let mut writes: Vec<(RowKey, Option<String>)> = Vec::new();
        for name in &changes.employees {
            writes.push((("employee".to_string(), name.clone()), body_of(tables.employees.get(name))?));
        }
        for path in &changes.locks {
            writes.push((("lock".to_string(), path.clone()), body_of(tables.locks.get(path))?));
        }
        for id in &changes.requests {
            writes.push((("request".to_string(), format!("{id:020}")), body_of(tables.requests.get(id))?));
        }
        for employee in &changes.tasks {
            writes.push((("task".to_string(), employee.clone()), body_of(tables.tasks.get(employee))?));
        }
        for index in changes.history.clone() {
            writes.push((("history".to_string(), format!("{index:020}")), body_of(tables.task_history.get(index))?));
        }
        if changes.next_id {
            writes.push((
                ("meta".to_string(), "next_id".to_string()),
                Some(serde_json::to_string(&tables.next_id)?),
            ));
        }

        let mut tx = self.pool.begin().await?;
        for ((kind, key), body) in writes {
            match body {
                Some(body) => {
                    sqlx::query(
                        r#"
                        INSERT OR REPLACE INTO warden_rows (kind, key, body)
                        VALUES (?1, ?2, ?3)
                        "#,
                    )
                    .bind(kind)
                    .bind(key)
                    .bind(body)
                    .execute(&mut *tx)
                    .await?;
                }
                None => {
                    sqlx::query("DELETE FROM warden_rows WHERE kind = ?1 AND key = ?2")
                        .bind(kind)
                        .bind(key)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn parse_key(key: &str) -> Result<u64> {
    key.parse()
        .map_err(|e| CoordinationError::Store(format!("Corrupt row key {key}: {e}")))
}

fn body_of<T: serde::Serialize>(row: Option<&T>) -> Result<Option<String>> {
    row.map(serde_json::to_string).transpose().map_err(Into::into)
}

#[async_trait]
impl TransactionalStore for SqliteStore {
    async fn transact<'a>(&self, tx: Transaction<'a>) -> Result<()> {
        let mut tables = self.tables.lock().await;
        // A transaction abandoned mid-write never committed
        tables.rollback();
        if let Err(e) = tx(&mut *tables) {
            tables.rollback();
            return Err(e);
        }

        let changes = tables.changes();
        if !changes.is_empty() {
            if let Err(e) = self.persist(&tables, &changes).await {
                tables.rollback();
                return Err(e);
            }
        }
        tables.commit();
        Ok(())
    }

    async fn inspect<'a>(&self, read: Inspection<'a>) -> Result<()> {
        let tables = self.tables.lock().await;
        read(&tables);
        Ok(())
    }
}
