//! Batch executor
//!
//! [`ApplyTransaction`] borrows one pooled connection for a single apply
//! cycle and runs every planned statement inside one transaction.

use std::sync::Arc;
use tracing::{debug, trace, warn};

use sluice_rdbc::connection::Transaction;
use sluice_rdbc::pool::{ConnectionPool, PooledConnection};
use sluice_rdbc::Value;

use crate::error::{ApplyError, Result};
use crate::statement::Statement;

/// One transactional unit of work against the target
pub struct ApplyTransaction {
    pool: Arc<dyn ConnectionPool>,
    conn: Option<PooledConnection>,
    tx: Option<Box<dyn Transaction>>,
    executed: u64,
}

impl ApplyTransaction {
    /// Create an idle transaction; nothing is borrowed until first use
    pub fn new(pool: Arc<dyn ConnectionPool>) -> Self {
        Self {
            pool,
            conn: None,
            tx: None,
            executed: 0,
        }
    }

    /// Rows affected since the last commit or rollback
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Whether a transaction is currently open
    pub fn is_active(&self) -> bool {
        self.tx.is_some()
    }

    async fn open(&mut self) -> sluice_rdbc::Result<&dyn Transaction> {
        if self.tx.is_none() {
            if self.conn.is_none() {
                self.conn = Some(self.pool.get().await?);
                debug!("Borrowed target connection");
            }
            if let Some(conn) = self.conn.as_ref() {
                self.tx = Some(conn.begin().await?);
            }
        }
        self.tx
            .as_deref()
            .ok_or_else(|| sluice_rdbc::Error::transaction("no open transaction"))
    }

    /// Borrow a connection and open the transaction if not done yet
    pub async fn begin(&mut self) -> Result<()> {
        self.open().await.map_err(ApplyError::Transaction)?;
        Ok(())
    }

    /// Execute one statement with one parameter set
    pub async fn execute_one(&mut self, sql: &str, params: &[Value]) -> sluice_rdbc::Result<u64> {
        let affected = self.open().await?.execute(sql, params).await?;
        self.executed += affected;
        Ok(affected)
    }

    /// Execute one statement text once per parameter set
    pub async fn execute_batch(
        &mut self,
        sql: &str,
        param_sets: &[Vec<Value>],
    ) -> sluice_rdbc::Result<u64> {
        let affected = self.open().await?.execute_many(sql, param_sets).await?;
        self.executed += affected;
        Ok(affected)
    }

    /// Execute a rendered statement, attributing failures to its table
    pub async fn run(&mut self, statement: &Statement) -> Result<u64> {
        trace!(
            table = %statement.table,
            kind = %statement.kind,
            sets = statement.param_sets.len(),
            sql = %statement.sql,
            "Executing statement"
        );

        let outcome = match statement.param_sets.as_slice() {
            [params] => self.execute_one(&statement.sql, params).await,
            sets => self.execute_batch(&statement.sql, sets).await,
        };

        outcome.map_err(|source| ApplyError::Execution {
            table: statement.table.clone(),
            kind: statement.kind,
            rows: statement.rows,
            source,
        })
    }

    /// Commit the open transaction, if any
    pub async fn commit(&mut self) -> Result<()> {
        let executed = std::mem::take(&mut self.executed);
        if let Some(tx) = self.tx.take() {
            tx.commit().await.map_err(ApplyError::Transaction)?;
            trace!(rows = executed, "Transaction committed");
        }
        Ok(())
    }

    /// Roll back the open transaction, if any
    pub async fn rollback(&mut self) -> Result<()> {
        let executed = std::mem::take(&mut self.executed);
        if let Some(tx) = self.tx.take() {
            tx.rollback().await.map_err(ApplyError::Transaction)?;
            trace!(rows = executed, "Transaction rolled back");
        }
        Ok(())
    }

    /// Return the connection to the pool. A transaction still open is
    /// rolled back first. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.tx.is_some() {
            if let Err(e) = self.rollback().await {
                warn!(error = %e, "Rollback on close failed");
            }
        }
        if self.conn.take().is_some() {
            debug!("Released target connection");
        }
    }
}

impl std::fmt::Debug for ApplyTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyTransaction")
            .field("url", &sluice_rdbc::connection::redact_url(self.pool.url()))
            .field("borrowed", &self.conn.is_some())
            .field("active", &self.tx.is_some())
            .field("executed", &self.executed)
            .finish()
    }
}
