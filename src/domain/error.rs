//! Error taxonomy for the pipeline
//!
//! None of these are fatal to a running process. The binaries only exit on
//! a failed initial bus connection or an unopenable store.

use std::time::Duration;
use thiserror::Error;

/// Connect / subscribe / publish failures on the message bus
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("mqtt connection failed: {0}")]
    Connect(#[from] rumqttc::ConnectionError),
    #[error("no connection acknowledgement within {0:?}")]
    ConnectTimeout(Duration),
    #[error("mqtt client request failed: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("bus unavailable: {0}")]
    Unavailable(String),
}

/// Malformed payload or missing/mistyped required field
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("payload rejected: {0}")]
    Json(#[from] serde_json::Error),
}

/// Table creation failed; fatal to the insert that needed it
#[derive(Debug, Error)]
#[error("ensuring table {table} failed: {source}")]
pub struct SchemaError {
    pub table: &'static str,
    #[source]
    pub source: rusqlite::Error,
}

/// Insert failed; the record is dropped
#[derive(Debug, Error)]
#[error("insert into {table} failed: {source}")]
pub struct PersistError {
    pub table: &'static str,
    #[source]
    pub source: rusqlite::Error,
}

impl PersistError {
    /// The destination table is gone, e.g. dropped after it was ensured
    pub fn is_missing_table(&self) -> bool {
        self.source.to_string().contains("no such table")
    }
}

/// Edge-side publish failure
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("caller supplied reserved field `{0}`")]
    ReservedField(&'static str),
    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Why the router did not persist a message
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unrecognized topic {0}")]
    UnknownTopic(String),
    #[error("decode failed on {topic}: {source}")]
    Decode {
        topic: &'static str,
        #[source]
        source: DecodeError,
    },
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

impl IngestError {
    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::UnknownTopic(_) => "unknown_topic",
            IngestError::Decode { .. } => "decode",
            IngestError::Schema(_) => "schema",
            IngestError::Persist(_) => "persist",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_missing_table_detected_from_sqlite_error() {
        let conn = Connection::open_in_memory().unwrap();
        let source = conn.execute("INSERT INTO ldr_data (value) VALUES (1)", []).unwrap_err();
        assert!(PersistError { table: "ldr_data", source }.is_missing_table());

        conn.execute_batch("CREATE TABLE ldr_data (value INTEGER NOT NULL)").unwrap();
        let source = conn.execute("INSERT INTO ldr_data (value) VALUES (NULL)", []).unwrap_err();
        assert!(!PersistError { table: "ldr_data", source }.is_missing_table());
    }
}
