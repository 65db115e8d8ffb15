//! Bounded SQLite connection pool.
//!
//! Connections are checked out for the duration of one transactional
//! operation and returned on every exit path via the guard's `Drop`. When
//! all `max` connections are busy a checkout blocks briefly, then fails
//! with a resource-exhaustion error instead of hanging the run.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use rusqlite::Connection;

use fleet_core::{FleetError, FleetResult};

const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(5);

struct PoolState {
    idle: Vec<Connection>,
    /// Connections in existence, idle or checked out.
    total: usize,
}

struct Shared {
    path: PathBuf,
    state: Mutex<PoolState>,
    available: Condvar,
    max: usize,
}

/// Cloneable handle to a bounded pool of SQLite connections.
#[derive(Clone)]
pub struct SqlitePool {
    shared: Arc<Shared>,
}

impl SqlitePool {
    /// Open a pool over the database file, pre-warming `min` connections.
    pub fn open(path: &Path, min: usize, max: usize) -> FleetResult<Self> {
        let max = max.max(1);
        let min = min.min(max);
        let mut idle = Vec::with_capacity(min);
        for _ in 0..min {
            idle.push(open_connection(path)?);
        }
        Ok(SqlitePool {
            shared: Arc::new(Shared {
                path: path.to_path_buf(),
                state: Mutex::new(PoolState { idle, total: min }),
                available: Condvar::new(),
                max,
            }),
        })
    }

    /// Check out a connection, opening a new one while below `max`.
    pub fn get(&self) -> FleetResult<PooledConnection> {
        let mut state = self
            .shared
            .state
            .lock()
            .map_err(|_| FleetError::Pool("connection pool poisoned".into()))?;

        loop {
            if let Some(conn) = state.idle.pop() {
                return Ok(PooledConnection {
                    shared: Arc::clone(&self.shared),
                    conn: Some(conn),
                });
            }
            if state.total < self.shared.max {
                state.total += 1;
                drop(state);
                // Opening can fail; give the slot back if it does
                match open_connection(&self.shared.path) {
                    Ok(conn) => {
                        return Ok(PooledConnection {
                            shared: Arc::clone(&self.shared),
                            conn: Some(conn),
                        })
                    }
                    Err(err) => {
                        let mut state = self
                            .shared
                            .state
                            .lock()
                            .map_err(|_| FleetError::Pool("connection pool poisoned".into()))?;
                        state.total -= 1;
                        self.shared.available.notify_one();
                        return Err(err);
                    }
                }
            }
            let (next, timeout) = self
                .shared
                .available
                .wait_timeout(state, CHECKOUT_TIMEOUT)
                .map_err(|_| FleetError::Pool("connection pool poisoned".into()))?;
            state = next;
            if timeout.timed_out() && state.idle.is_empty() {
                return Err(FleetError::Pool(format!(
                    "no database connection available within {}s (max {})",
                    CHECKOUT_TIMEOUT.as_secs(),
                    self.shared.max
                )));
            }
        }
    }
}

fn open_connection(path: &Path) -> FleetResult<Connection> {
    let conn = Connection::open(path)
        .map_err(|e| FleetError::Database(format!("opening '{}': {e}", path.display())))?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| FleetError::Database(format!("enabling foreign keys: {e}")))?;
    Ok(conn)
}

/// RAII checkout; the connection returns to the pool on drop.
pub struct PooledConnection {
    shared: Arc<Shared>,
    conn: Option<Connection>,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection").finish()
    }
}

impl Deref for PooledConnection {
    type Target = Connection;
    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Ok(mut state) = self.shared.state.lock() {
                state.idle.push(conn);
                self.shared.available.notify_one();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn checkout_and_return_cycle() {
        let dir = TempDir::new().unwrap();
        let pool = SqlitePool::open(&dir.path().join("fleet.db"), 1, 2).unwrap();
        {
            let conn = pool.get().unwrap();
            conn.execute_batch("CREATE TABLE t (x INTEGER)").unwrap();
        }
        // Returned connection sees the same database
        let conn = pool.get().unwrap();
        let n: i64 = conn
            .query_row("SELECT count(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn grows_to_max_then_exhausts() {
        let dir = TempDir::new().unwrap();
        let pool = SqlitePool::open(&dir.path().join("fleet.db"), 0, 2).unwrap();
        let _a = pool.get().unwrap();
        let _b = pool.get().unwrap();
        let err = pool.get().unwrap_err();
        assert!(matches!(err, FleetError::Pool(_)));
    }
}
