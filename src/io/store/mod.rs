//! SQLite storage: connection pool, per-topic schema and inserts

pub mod persister;
pub mod pool;
pub mod schema;

pub use persister::Persister;
pub use pool::ConnectionPool;
pub use schema::{SchemaManager, TableSchema};

use std::sync::Arc;

/// Opened database shared by the schema manager and the persister
#[derive(Clone)]
pub struct Store {
    pool: Arc<ConnectionPool>,
}

impl Store {
    pub fn open(path: &str, pool_size: usize) -> rusqlite::Result<Self> {
        Ok(Self { pool: Arc::new(ConnectionPool::open(path, pool_size)?) })
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn schema_manager(&self) -> SchemaManager {
        SchemaManager::new(self.pool.clone())
    }

    pub fn persister(&self) -> Persister {
        Persister::new(self.pool.clone())
    }
}
