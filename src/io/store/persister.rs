//! Single-record inserts, one transaction each

use crate::domain::error::PersistError;
use crate::domain::record::{PersistedRecord, TelemetryRecord};
use crate::io::store::pool::ConnectionPool;
use crate::io::store::schema::TableSchema;
use rusqlite::params;
use std::sync::Arc;
use tracing::debug;

pub struct Persister {
    pool: Arc<ConnectionPool>,
}

impl Persister {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    /// Insert one record into its topic table
    ///
    /// The table must already exist (see `SchemaManager::ensure`). A failure
    /// leaves no partial row and does not affect other inserts.
    pub fn insert(&self, record: &PersistedRecord) -> Result<(), PersistError> {
        let schema = TableSchema::for_topic(record.reading.topic());
        let table = schema.table;
        let err = |source| PersistError { table, source };

        let timestamp = record.formatted_timestamp();
        let owner = record.device_owner.as_str();

        let mut conn = self.pool.acquire();
        let tx = conn.transaction().map_err(err)?;
        match &record.reading {
            TelemetryRecord::Light { value } => {
                tx.execute(schema.insert_sql, params![timestamp, value, owner])
            }
            TelemetryRecord::Distance { distance } => {
                tx.execute(schema.insert_sql, params![timestamp, distance, owner])
            }
            TelemetryRecord::BoxStatus { status, distance } => {
                tx.execute(schema.insert_sql, params![timestamp, status.as_str(), distance, owner])
            }
            TelemetryRecord::Battery { voltage, percentage } => {
                tx.execute(schema.insert_sql, params![timestamp, voltage, percentage, owner])
            }
        }
        .map_err(err)?;
        let id = tx.last_insert_rowid();
        tx.commit().map_err(err)?;

        debug!(table = %table, id = %id, device_owner = %owner, "row_inserted");
        Ok(())
    }
}
