use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Inspection, StoreTables, Transaction, TransactionalStore};
use crate::errors::Result;

/// In-process store; writers are serialised by one async mutex
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<StoreTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionalStore for MemoryStore {
    async fn transact<'a>(&self, tx: Transaction<'a>) -> Result<()> {
        let mut tables = self.tables.lock().await;
        match tx(&mut *tables) {
            Ok(()) => {
                tables.commit();
                Ok(())
            }
            Err(e) => {
                tables.rollback();
                Err(e)
            }
        }
    }

    async fn inspect<'a>(&self, read: Inspection<'a>) -> Result<()> {
        let tables = self.tables.lock().await;
        read(&tables);
        Ok(())
    }
}
