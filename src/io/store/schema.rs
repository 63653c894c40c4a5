//! Per-topic table definitions and idempotent creation

use crate::domain::error::SchemaError;
use crate::domain::types::Topic;
use crate::io::store::pool::ConnectionPool;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Shape of one destination table
#[derive(Debug)]
pub struct TableSchema {
    pub table: &'static str,
    pub create_sql: &'static str,
    pub insert_sql: &'static str,
}

pub static LDR_TABLE: TableSchema = TableSchema {
    table: "ldr_data",
    create_sql: r#"
        CREATE TABLE IF NOT EXISTS ldr_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp DATETIME NOT NULL,
            value INTEGER NOT NULL,
            device_owner VARCHAR(255) NOT NULL
        );
    "#,
    insert_sql: "INSERT INTO ldr_data (timestamp, value, device_owner) VALUES (?1, ?2, ?3)",
};

pub static ULTRASOUND_TABLE: TableSchema = TableSchema {
    table: "ultrasound_data",
    create_sql: r#"
        CREATE TABLE IF NOT EXISTS ultrasound_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp DATETIME NOT NULL,
            value REAL NOT NULL,
            device_owner VARCHAR(255) NOT NULL
        );
    "#,
    insert_sql: "INSERT INTO ultrasound_data (timestamp, value, device_owner) VALUES (?1, ?2, ?3)",
};

pub static BOX_STATUS_TABLE: TableSchema = TableSchema {
    table: "empty_box_status",
    create_sql: r#"
        CREATE TABLE IF NOT EXISTS empty_box_status (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp DATETIME NOT NULL,
            status VARCHAR(10) NOT NULL,
            distance REAL,
            device_owner VARCHAR(255) NOT NULL
        );
    "#,
    insert_sql: "INSERT INTO empty_box_status (timestamp, status, distance, device_owner) \
                 VALUES (?1, ?2, ?3, ?4)",
};

pub static BATTERY_TABLE: TableSchema = TableSchema {
    table: "battery_data",
    create_sql: r#"
        CREATE TABLE IF NOT EXISTS battery_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp DATETIME NOT NULL,
            voltage REAL NOT NULL,
            percentage INTEGER NOT NULL,
            device_owner VARCHAR(255) NOT NULL
        );
    "#,
    insert_sql: "INSERT INTO battery_data (timestamp, voltage, percentage, device_owner) \
                 VALUES (?1, ?2, ?3, ?4)",
};

impl TableSchema {
    pub fn for_topic(topic: Topic) -> &'static TableSchema {
        match topic {
            Topic::Light => &LDR_TABLE,
            Topic::Distance => &ULTRASOUND_TABLE,
            Topic::BoxStatus => &BOX_STATUS_TABLE,
            Topic::Battery => &BATTERY_TABLE,
        }
    }
}

/// Ensures destination tables exist before inserts
///
/// Remembers which tables it has already created in this process so the
/// DDL runs once per table. `CREATE TABLE IF NOT EXISTS` keeps concurrent or
/// repeated calls harmless either way.
pub struct SchemaManager {
    pool: Arc<ConnectionPool>,
    ensured: Mutex<FxHashSet<&'static str>>,
}

impl SchemaManager {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool, ensured: Mutex::new(FxHashSet::default()) }
    }

    pub fn ensure(&self, schema: &'static TableSchema) -> Result<(), SchemaError> {
        if self.ensured.lock().contains(schema.table) {
            return Ok(());
        }

        {
            let conn = self.pool.acquire();
            conn.execute_batch(schema.create_sql)
                .map_err(|source| SchemaError { table: schema.table, source })?;
        }

        if self.ensured.lock().insert(schema.table) {
            info!(table = %schema.table, "table_ensured");
        } else {
            debug!(table = %schema.table, "table_ensured_concurrently");
        }
        Ok(())
    }

    /// Drop the cached entry so the next `ensure` runs the DDL again
    pub fn forget(&self, table: &str) {
        self.ensured.lock().remove(table);
    }

    /// Whether the table currently exists in the database
    pub fn table_exists(&self, table: &str) -> rusqlite::Result<bool> {
        let conn = self.pool.acquire();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
