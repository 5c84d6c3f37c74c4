use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::models::schema::Table;

/// Table lookups shared across requests. Entries are dropped whenever a
/// column of the table changes.
#[derive(Default, Clone)]
pub struct TableCache {
    tables: Arc<RwLock<HashMap<i64, Table>>>,
}

impl TableCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, table_id: i64) -> Option<Table> {
        self.tables.read().await.get(&table_id).cloned()
    }

    pub async fn insert(&self, table: Table) {
        self.tables.write().await.insert(table.id, table);
    }

    pub async fn invalidate(&self, table_id: i64) {
        self.tables.write().await.remove(&table_id);
    }
}
