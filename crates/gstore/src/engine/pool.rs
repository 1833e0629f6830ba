//! Bounded pool of relational connections.
//!
//! A semaphore caps the number of live connections. Idle connections are kept
//! in a FIFO and handed out before new ones are opened. Acquisition suspends
//! until a permit frees up and never times out; this is the only backpressure
//! the storage layer applies.
//!
//! A connection dropped while a transaction it began is still open (for
//! instance when the owning future is cancelled) is discarded instead of
//! returned to the idle queue, so the engine rolls the transaction back when
//! the session closes.

use core::ops::{Deref, DerefMut};
use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Semaphore, SemaphorePermit};

use super::{Connection, Connector, Param};
use crate::{Error, Record, Result};

struct PoolState<T> {
    idle: VecDeque<T>,
    closed: bool,
}

pub struct ConnectionPool<C: Connector> {
    connector: C,
    max_connections: usize,
    semaphore: Semaphore,
    state: Mutex<PoolState<C::Conn>>,
}

impl<C: Connector> ConnectionPool<C> {
    /// Creates an empty pool; connections are opened lazily.
    pub fn new(connector: C, max_connections: usize) -> Self {
        let max_connections = max_connections.max(1);
        Self {
            connector,
            max_connections,
            semaphore: Semaphore::new(max_connections),
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                closed: false,
            }),
        }
    }

    pub const fn connector(&self) -> &C {
        &self.connector
    }

    pub const fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Waits for a free slot and returns a reused or newly opened connection.
    pub async fn acquire(&self) -> Result<PooledConnection<'_, C>> {
        if self.is_closed() {
            return Err(Error::backend("connection pool is closed"));
        }
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| Error::backend("connection pool is closed"))?;

        let reused = {
            let mut state = self.state.lock();
            loop {
                match state.idle.pop_front() {
                    Some(conn) if conn.is_closed() => continue,
                    other => break other,
                }
            }
        };
        let conn = match reused {
            Some(conn) => conn,
            None => self.connector.connect().await?,
        };

        Ok(PooledConnection {
            pool: self,
            conn: Some(conn),
            in_transaction: false,
            _permit: permit,
        })
    }

    fn release(&self, conn: C::Conn) {
        let mut state = self.state.lock();
        if !state.closed && !conn.is_closed() {
            state.idle.push_back(conn);
        }
    }

    /// Refuses new acquisitions and drops every idle connection. Connections
    /// currently checked out are dropped when released.
    pub fn close(&self) {
        let drained = {
            let mut state = self.state.lock();
            state.closed = true;
            core::mem::take(&mut state.idle)
        };
        self.semaphore.close();
        drop(drained);
        #[cfg(feature = "tracing")]
        tracing::debug!("connection pool closed");
    }
}

/// A connection checked out of a [`ConnectionPool`], returned on drop.
///
/// Used as a [`Connection`] itself, it tracks the transaction state its
/// `BEGIN`/`COMMIT`/`ROLLBACK` batches leave the session in.
pub struct PooledConnection<'a, C: Connector> {
    pool: &'a ConnectionPool<C>,
    conn: Option<C::Conn>,
    in_transaction: bool,
    _permit: SemaphorePermit<'a>,
}

impl<C: Connector> PooledConnection<'_, C> {
    /// Whether a transaction begun on this connection is still open.
    pub const fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

impl<C: Connector> Deref for PooledConnection<'_, C> {
    type Target = C::Conn;

    fn deref(&self) -> &Self::Target {
        // Only `Drop` takes the connection out.
        self.conn.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<C: Connector> DerefMut for PooledConnection<'_, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().unwrap_or_else(|| unreachable!())
    }
}

#[async_trait]
impl<'a, C: Connector> Connection for PooledConnection<'a, C> {
    async fn query(&mut self, sql: &str, params: &[Param]) -> Result<Vec<Record>> {
        (**self).query(sql, params).await
    }

    async fn execute(&mut self, sql: &str, params: &[Param]) -> Result<u64> {
        (**self).execute(sql, params).await
    }

    async fn batch(&mut self, sql: &str) -> Result<()> {
        (**self).batch(sql).await?;
        let statement = sql.trim().trim_end_matches(';');
        if statement.eq_ignore_ascii_case("BEGIN") {
            self.in_transaction = true;
        } else if statement.eq_ignore_ascii_case("COMMIT") || statement.eq_ignore_ascii_case("ROLLBACK") {
            self.in_transaction = false;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }
}

impl<C: Connector> Drop for PooledConnection<'_, C> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.in_transaction {
            #[cfg(feature = "tracing")]
            tracing::warn!("discarding connection with an unfinished transaction");
            drop(conn);
            return;
        }
        self.pool.release(conn);
    }
}
