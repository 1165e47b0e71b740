//! Connection pooling for sqlrel using asupersync.
//!
//! [`Pool`] wraps a driver [`Connector`] and implements
//! [`ConnectionSource`], the contract the executor acquires transaction and
//! statement connections through.
//!
//! Connections are opened lazily up to `max_connections`. Idle connections
//! are reused in LIFO order; ones that outlived `max_lifetime_ms` or sat idle
//! longer than `idle_timeout_ms` are closed on checkout instead of reused.
//! `acquire` never waits: a pool at capacity fails with
//! [`PoolErrorKind::Exhausted`].

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sqlrel_core::{
    Connection, ConnectionSource, Connector, Cx, Error, Outcome, PoolError, PoolErrorKind,
    QueryResult, Value,
};

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections opened by [`Pool::warm`]
    pub min_connections: usize,
    /// Maximum number of connections allowed
    pub max_connections: usize,
    /// Connection idle timeout in milliseconds
    pub idle_timeout_ms: u64,
    /// Maximum lifetime of a connection in milliseconds
    pub max_lifetime_ms: u64,
    /// Ping idle connections before giving them out
    pub test_on_checkout: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            idle_timeout_ms: 600_000,   // 10 minutes
            max_lifetime_ms: 1_800_000, // 30 minutes
            test_on_checkout: true,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with the given max connections.
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            ..Default::default()
        }
    }

    /// Set minimum connections.
    pub fn min_connections(mut self, n: usize) -> Self {
        self.min_connections = n;
        self
    }

    /// Set idle timeout.
    pub fn idle_timeout(mut self, ms: u64) -> Self {
        self.idle_timeout_ms = ms;
        self
    }

    /// Set max lifetime.
    pub fn max_lifetime(mut self, ms: u64) -> Self {
        self.max_lifetime_ms = ms;
        self
    }

    /// Enable/disable test on checkout.
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.test_on_checkout = enabled;
        self
    }

    /// Reject configurations the pool cannot honor.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_connections == 0 {
            return Err(pool_error(
                PoolErrorKind::Config,
                "max_connections must be at least 1",
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(pool_error(
                PoolErrorKind::Config,
                format!(
                    "min_connections ({}) exceeds max_connections ({})",
                    self.min_connections, self.max_connections
                ),
            ));
        }
        Ok(())
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total number of connections (active + idle)
    pub total_connections: usize,
    /// Number of idle connections
    pub idle_connections: usize,
    /// Number of checked-out connections
    pub active_connections: usize,
    /// Successful acquisitions since creation
    pub acquired: u64,
    /// Releases since creation
    pub released: u64,
    /// Driver connections opened since creation
    pub opened: u64,
}

/// A connection borrowed from the pool.
///
/// Derefs to the driver connection and executes statements on it.
pub struct PooledConnection<C> {
    conn: C,
    created: Instant,
}

impl<C> PooledConnection<C> {
    /// Get the inner connection.
    pub fn into_inner(self) -> C {
        self.conn
    }

    /// Time since the driver connection was opened.
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }
}

impl<C> std::ops::Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<C: Connection> Connection for PooledConnection<C> {
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<QueryResult, Error>> + Send {
        self.conn.query(cx, sql, params)
    }

    fn ping(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.conn.ping(cx)
    }
}

struct Idle<C> {
    conn: PooledConnection<C>,
    idle_since: Instant,
}

struct PoolState<C> {
    idle: Vec<Idle<C>>,
    total: usize,
    active: usize,
    closed: bool,
    acquired: u64,
    released: u64,
    opened: u64,
}

/// A connection pool over a driver connector.
pub struct Pool<K: Connector> {
    connector: K,
    config: PoolConfig,
    state: Mutex<PoolState<K::Conn>>,
}

fn pool_error(kind: PoolErrorKind, message: impl Into<String>) -> Error {
    Error::Pool(PoolError {
        kind,
        message: message.into(),
        source: None,
    })
}

enum Checkout<C> {
    Reuse(PooledConnection<C>),
    Discard(PooledConnection<C>),
    Open,
}

impl<K: Connector> Pool<K> {
    /// Create a new connection pool.
    pub fn new(connector: K, config: PoolConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            connector,
            config,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                total: 0,
                active: 0,
                closed: false,
                acquired: 0,
                released: 0,
                opened: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<K::Conn>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Get the current pool statistics.
    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            total_connections: state.total,
            idle_connections: state.idle.len(),
            active_connections: state.active,
            acquired: state.acquired,
            released: state.released,
            opened: state.opened,
        }
    }

    /// Check if the pool is at capacity.
    pub fn at_capacity(&self) -> bool {
        self.lock().total >= self.config.max_connections
    }

    fn expired(&self, entry: &Idle<K::Conn>, now: Instant) -> bool {
        now.duration_since(entry.conn.created)
            >= Duration::from_millis(self.config.max_lifetime_ms)
            || now.duration_since(entry.idle_since)
                >= Duration::from_millis(self.config.idle_timeout_ms)
    }

    /// Decide how the next checkout is served, reserving a slot for it.
    fn checkout(&self) -> Result<Checkout<K::Conn>, Error> {
        let mut state = self.lock();
        if state.closed {
            return Err(pool_error(PoolErrorKind::Closed, "pool is closed"));
        }
        if let Some(entry) = state.idle.pop() {
            state.active += 1;
            return Ok(if self.expired(&entry, Instant::now()) {
                Checkout::Discard(entry.conn)
            } else {
                Checkout::Reuse(entry.conn)
            });
        }
        if state.total >= self.config.max_connections {
            return Err(pool_error(
                PoolErrorKind::Exhausted,
                format!(
                    "all {} connections are in use",
                    self.config.max_connections
                ),
            ));
        }
        state.total += 1;
        state.active += 1;
        Ok(Checkout::Open)
    }

    /// Give back a reserved slot whose connection never reached the caller.
    fn forfeit(&self) {
        let mut state = self.lock();
        state.total = state.total.saturating_sub(1);
        state.active = state.active.saturating_sub(1);
    }

    async fn discard(&self, cx: &Cx, conn: PooledConnection<K::Conn>) {
        self.forfeit();
        if let Outcome::Err(e) = self.connector.disconnect(cx, conn.conn).await {
            tracing::warn!(error = %e, "failed to close discarded connection");
        }
    }

    /// Open connections until `min_connections` are idle or in use.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn warm(&self, cx: &Cx) -> Outcome<(), Error> {
        loop {
            {
                let mut state = self.lock();
                if state.closed || state.total >= self.config.min_connections {
                    return Outcome::Ok(());
                }
                state.total += 1;
            }
            let conn = match self.connector.connect(cx).await {
                Outcome::Ok(conn) => conn,
                Outcome::Err(e) => {
                    self.lock().total -= 1;
                    return Outcome::Err(e);
                }
                Outcome::Cancelled(r) => {
                    self.lock().total -= 1;
                    return Outcome::Cancelled(r);
                }
                Outcome::Panicked(p) => {
                    self.lock().total -= 1;
                    return Outcome::Panicked(p);
                }
            };
            let now = Instant::now();
            let mut state = self.lock();
            state.opened += 1;
            state.idle.push(Idle {
                conn: PooledConnection { conn, created: now },
                idle_since: now,
            });
        }
    }

    /// Close the pool and every idle connection.
    ///
    /// Connections still checked out are dropped when released.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn close(&self, cx: &Cx) {
        let idle = {
            let mut state = self.lock();
            state.closed = true;
            let idle = std::mem::take(&mut state.idle);
            state.total = state.total.saturating_sub(idle.len());
            idle
        };
        for entry in idle {
            if let Outcome::Err(e) = self.connector.disconnect(cx, entry.conn.conn).await {
                tracing::warn!(error = %e, "failed to close idle connection");
            }
        }
    }
}

impl<K: Connector> ConnectionSource for Pool<K> {
    type Conn = PooledConnection<K::Conn>;

    fn acquire(&self, cx: &Cx) -> impl Future<Output = Outcome<Self::Conn, Error>> + Send {
        async move {
            loop {
                let checkout = match self.checkout() {
                    Ok(checkout) => checkout,
                    Err(e) => return Outcome::Err(e),
                };
                let conn = match checkout {
                    Checkout::Discard(conn) => {
                        tracing::debug!("closing expired idle connection");
                        self.discard(cx, conn).await;
                        continue;
                    }
                    Checkout::Reuse(conn) => {
                        if self.config.test_on_checkout && !conn.is_valid(cx).await {
                            tracing::debug!("idle connection failed its checkout ping");
                            self.discard(cx, conn).await;
                            continue;
                        }
                        conn
                    }
                    Checkout::Open => match self.connector.connect(cx).await {
                        Outcome::Ok(conn) => {
                            self.lock().opened += 1;
                            PooledConnection {
                                conn,
                                created: Instant::now(),
                            }
                        }
                        Outcome::Err(e) => {
                            self.forfeit();
                            return Outcome::Err(e);
                        }
                        Outcome::Cancelled(r) => {
                            self.forfeit();
                            return Outcome::Cancelled(r);
                        }
                        Outcome::Panicked(p) => {
                            self.forfeit();
                            return Outcome::Panicked(p);
                        }
                    },
                };
                self.lock().acquired += 1;
                tracing::trace!(stats = ?self.stats(), "connection acquired");
                return Outcome::Ok(conn);
            }
        }
    }

    fn release(&self, conn: Self::Conn) {
        let mut state = self.lock();
        state.active = state.active.saturating_sub(1);
        state.released += 1;
        if state.closed {
            state.total = state.total.saturating_sub(1);
            return;
        }
        state.idle.push(Idle {
            conn,
            idle_since: Instant::now(),
        });
    }
}
