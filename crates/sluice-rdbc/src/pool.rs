//! Connection pool abstraction for sluice-rdbc
//!
//! The apply engine borrows exactly one connection per apply cycle; the pool
//! bounds how many connections exist, validates idle ones on borrow and
//! recycles connections past their lifetime.
//!
//! # Example
//!
//! ```rust,ignore
//! use sluice_rdbc::prelude::*;
//!
//! let pool = SimpleConnectionPool::new(
//!     PoolConfig::new("mysql://localhost/db").with_max_size(4),
//!     Arc::new(factory),
//! ).await?;
//!
//! let conn = pool.get().await?;
//! conn.execute("DELETE FROM t WHERE id = ?", &[Value::Int64(1)]).await?;
//! // Connection is returned to pool when dropped
//! ```

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OnceCell, Semaphore};
use tracing::debug;

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory};
use crate::error::{Error, Result};

/// Connection pool trait
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Get a connection from the pool
    async fn get(&self) -> Result<PooledConnection>;

    /// Return a connection to the pool
    async fn release(&self, conn: Box<dyn Connection>, created_at: Instant);

    /// Connection URL the pool connects to
    fn url(&self) -> &str;

    /// Get current pool size
    fn size(&self) -> usize;

    /// Get pool statistics
    fn stats(&self) -> PoolStats;

    /// Close all connections and shutdown the pool
    async fn close(&self) -> Result<()>;
}

/// A connection borrowed from the pool
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    created_at: Instant,
    pool: Arc<dyn ConnectionPool>,
}

impl PooledConnection {
    /// Create a new pooled connection wrapper
    pub fn new(conn: Box<dyn Connection>, created_at: Instant, pool: Arc<dyn ConnectionPool>) -> Self {
        Self {
            conn: Some(conn),
            created_at,
            pool,
        }
    }

    /// Get the underlying connection
    pub fn connection(&self) -> &(dyn Connection + 'static) {
        self.conn
            .as_ref()
            .expect("connection already returned")
            .as_ref()
    }

    /// Age of the underlying connection
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.connection()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let pool = self.pool.clone();
            let created_at = self.created_at;
            tokio::spawn(async move {
                pool.release(conn, created_at).await;
            });
        }
    }
}

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connection configuration
    pub connection: ConnectionConfig,
    /// Minimum pool size (connections opened eagerly)
    pub min_size: usize,
    /// Maximum pool size
    pub max_size: usize,
    /// Maximum time to wait for a connection
    pub acquire_timeout: Duration,
    /// Maximum connection lifetime (for recycling)
    pub max_lifetime: Duration,
    /// Idle timeout (connections idle longer are closed)
    pub idle_timeout: Duration,
    /// Whether to test connections on borrow
    pub test_on_borrow: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            min_size: 1,
            max_size: 4,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(1800),
            idle_timeout: Duration::from_secs(600),
            test_on_borrow: true,
        }
    }
}

impl PoolConfig {
    /// Create pool config from a connection URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            connection: ConnectionConfig::new(url),
            ..Default::default()
        }
    }

    /// Set minimum pool size
    pub fn with_min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    /// Set maximum pool size
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set acquire timeout
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set maximum connection lifetime
    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Set idle timeout
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Enable/disable test on borrow
    pub fn with_test_on_borrow(mut self, test: bool) -> Self {
        self.test_on_borrow = test;
        self
    }
}

/// Pool statistics
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of connections created
    pub connections_created: u64,
    /// Total number of connections closed
    pub connections_closed: u64,
    /// Total number of connection acquisitions
    pub acquisitions: u64,
    /// Number of times pool was exhausted
    pub exhausted_count: u64,
    /// Total wait time for connections (in milliseconds)
    pub total_wait_time_ms: u64,
    /// Number of health check failures
    pub health_check_failures: u64,
}

impl PoolStats {
    /// Fraction of acquisitions served by an existing connection
    pub fn reuse_rate(&self) -> f64 {
        if self.acquisitions == 0 {
            return 0.0;
        }
        let reused = self.acquisitions.saturating_sub(self.connections_created);
        reused as f64 / self.acquisitions as f64
    }
}

/// Atomic pool stats for concurrent updates
#[derive(Debug, Default)]
#[allow(missing_docs)]
pub struct AtomicPoolStats {
    pub connections_created: AtomicU64,
    pub connections_closed: AtomicU64,
    pub acquisitions: AtomicU64,
    pub exhausted_count: AtomicU64,
    pub total_wait_time_ms: AtomicU64,
    pub health_check_failures: AtomicU64,
}

impl AtomicPoolStats {
    /// Create new atomic stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection creation
    pub fn record_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection close
    pub fn record_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an acquisition
    pub fn record_acquisition(&self, wait_time_ms: u64) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        self.total_wait_time_ms
            .fetch_add(wait_time_ms, Ordering::Relaxed);
    }

    /// Record pool exhaustion
    pub fn record_exhausted(&self) {
        self.exhausted_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record health check failure
    pub fn record_health_check_failure(&self) {
        self.health_check_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot current stats
    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            exhausted_count: self.exhausted_count.load(Ordering::Relaxed),
            total_wait_time_ms: self.total_wait_time_ms.load(Ordering::Relaxed),
            health_check_failures: self.health_check_failures.load(Ordering::Relaxed),
        }
    }
}

/// Semaphore-bounded pool with an idle stack.
///
/// Idle connections are reused LIFO. Expired or invalid idle connections are
/// discarded on borrow.
pub struct SimpleConnectionPool {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    idle: Mutex<Vec<PoolEntry>>,
    semaphore: Semaphore,
    total_connections: AtomicUsize,
    stats: AtomicPoolStats,
    shutdown: AtomicBool,
    self_ref: OnceCell<Weak<Self>>,
}

struct PoolEntry {
    conn: Box<dyn Connection>,
    created_at: Instant,
    last_used: Instant,
}

impl SimpleConnectionPool {
    /// Create a new connection pool, opening `min_size` connections eagerly.
    pub async fn new(config: PoolConfig, factory: Arc<dyn ConnectionFactory>) -> Result<Arc<Self>> {
        if config.max_size == 0 {
            return Err(Error::config("pool max_size must be at least 1"));
        }

        let pool = Arc::new(Self {
            semaphore: Semaphore::new(config.max_size),
            idle: Mutex::new(Vec::with_capacity(config.max_size)),
            config,
            factory,
            total_connections: AtomicUsize::new(0),
            stats: AtomicPoolStats::new(),
            shutdown: AtomicBool::new(false),
            self_ref: OnceCell::new(),
        });

        let _ = pool.self_ref.set(Arc::downgrade(&pool));

        for _ in 0..pool.config.min_size.min(pool.config.max_size) {
            let conn = pool.create_connection().await?;
            let now = Instant::now();
            pool.idle.lock().await.push(PoolEntry {
                conn,
                created_at: now,
                last_used: now,
            });
        }

        Ok(pool)
    }

    async fn create_connection(&self) -> Result<Box<dyn Connection>> {
        let conn = self.factory.connect(&self.config.connection).await?;
        self.total_connections.fetch_add(1, Ordering::Release);
        self.stats.record_created();
        Ok(conn)
    }

    fn discard(&self) {
        self.total_connections.fetch_sub(1, Ordering::Release);
        self.stats.record_closed();
    }

    fn should_recycle(&self, entry: &PoolEntry) -> bool {
        entry.created_at.elapsed() > self.config.max_lifetime
            || entry.last_used.elapsed() > self.config.idle_timeout
    }

    /// Get pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}

#[async_trait]
impl ConnectionPool for SimpleConnectionPool {
    async fn get(&self) -> Result<PooledConnection> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::PoolExhausted {
                message: "pool is shut down".to_string(),
            });
        }

        let start = Instant::now();

        let permit = tokio::time::timeout(self.config.acquire_timeout, self.semaphore.acquire())
            .await
            .map_err(|_| {
                self.stats.record_exhausted();
                Error::PoolExhausted {
                    message: format!(
                        "timeout waiting for connection ({}ms)",
                        self.config.acquire_timeout.as_millis()
                    ),
                }
            })?
            .map_err(|_| Error::PoolExhausted {
                message: "pool semaphore closed".to_string(),
            })?;

        let reused = {
            let mut idle = self.idle.lock().await;
            loop {
                match idle.pop() {
                    Some(entry) => {
                        if self.should_recycle(&entry) {
                            debug!("Recycling expired pooled connection");
                            let _ = entry.conn.close().await;
                            self.discard();
                            continue;
                        }
                        if self.config.test_on_borrow && !entry.conn.is_valid().await {
                            self.discard();
                            self.stats.record_health_check_failure();
                            continue;
                        }
                        break Some((entry.conn, entry.created_at));
                    }
                    None => break None,
                }
            }
        };

        let (conn, created_at) = match reused {
            Some(found) => found,
            None => (self.create_connection().await?, Instant::now()),
        };

        self.stats
            .record_acquisition(start.elapsed().as_millis() as u64);

        // Released again in `release` when the PooledConnection drops.
        permit.forget();

        let pool: Arc<dyn ConnectionPool> = self
            .self_ref
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| Error::PoolExhausted {
                message: "pool has been dropped".to_string(),
            })?;

        Ok(PooledConnection::new(conn, created_at, pool))
    }

    async fn release(&self, conn: Box<dyn Connection>, created_at: Instant) {
        self.semaphore.add_permits(1);

        if self.shutdown.load(Ordering::Acquire) {
            let _ = conn.close().await;
            self.discard();
            return;
        }

        self.idle.lock().await.push(PoolEntry {
            conn,
            created_at,
            last_used: Instant::now(),
        });
    }

    fn url(&self) -> &str {
        &self.config.connection.url
    }

    fn size(&self) -> usize {
        self.total_connections.load(Ordering::Acquire)
    }

    fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }

    async fn close(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::Release);

        let mut idle = self.idle.lock().await;
        for entry in idle.drain(..) {
            let _ = entry.conn.close().await;
            self.discard();
        }

        Ok(())
    }
}
