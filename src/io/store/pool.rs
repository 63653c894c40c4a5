//! Fixed-size SQLite connection pool
//!
//! Connections are opened once at startup and handed out behind a mutex
//! guard, so a connection is released on every exit path of the caller.

use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::info;

/// How long a writer waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ConnectionPool {
    connections: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl ConnectionPool {
    /// Open `size` connections to `path`
    ///
    /// In-memory databases are private per connection, so `:memory:` always
    /// gets a single connection.
    pub fn open(path: &str, size: usize) -> rusqlite::Result<Self> {
        let size = if path == ":memory:" { 1 } else { size.max(1) };

        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open(path)?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.execute_batch(
                r#"
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                "#,
            )?;
            connections.push(Mutex::new(conn));
        }

        info!(path = %path, pool_size = %size, "storage_opened");
        Ok(Self { connections, next: AtomicUsize::new(0) })
    }

    pub fn size(&self) -> usize {
        self.connections.len()
    }

    /// Take an idle connection, or wait on the round-robin slot if all are busy
    pub fn acquire(&self) -> MutexGuard<'_, Connection> {
        let start = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        for offset in 0..self.connections.len() {
            let idx = (start + offset) % self.connections.len();
            if let Some(guard) = self.connections[idx].try_lock() {
                return guard;
            }
        }
        self.connections[start].lock()
    }
}
