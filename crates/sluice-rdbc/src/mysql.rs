//! MySQL backend implementation for sluice-rdbc
//!
//! Covers MySQL, MariaDB and MySQL-compatible stores:
//! - Connection with prepared batch execution
//! - Transactions via explicit BEGIN/COMMIT/ROLLBACK

use async_trait::async_trait;
use chrono::{Datelike, Timelike};
use mysql_async::prelude::*;
use mysql_async::{Conn, OptsBuilder};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, DatabaseType, Transaction};
use crate::error::{Error, Result};
use crate::types::Value;

/// Convert a sluice Value to a MySQL compatible parameter
fn value_to_sql(value: &Value) -> mysql_async::Value {
    match value {
        Value::Null => mysql_async::Value::NULL,
        Value::Bool(b) => mysql_async::Value::from(*b),
        Value::Int8(n) => mysql_async::Value::from(*n),
        Value::Int16(n) => mysql_async::Value::from(*n),
        Value::Int32(n) => mysql_async::Value::from(*n),
        Value::Int64(n) => mysql_async::Value::from(*n),
        Value::Float32(n) => mysql_async::Value::from(*n),
        Value::Float64(n) => mysql_async::Value::from(*n),
        // DECIMAL and unsigned BIGINT travel as text to keep full precision
        Value::Decimal(d) => mysql_async::Value::from(d.to_string()),
        Value::String(s) => mysql_async::Value::from(s.clone()),
        Value::Bytes(b) => mysql_async::Value::from(b.clone()),
        Value::Date(d) => {
            mysql_async::Value::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0)
        }
        Value::Time(t) => mysql_async::Value::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1000,
        ),
        Value::DateTime(dt) => naive_to_mysql(dt),
        Value::DateTimeTz(dt) => naive_to_mysql(&dt.naive_utc()),
    }
}

fn naive_to_mysql(dt: &chrono::NaiveDateTime) -> mysql_async::Value {
    let (date, time) = (dt.date(), dt.time());
    mysql_async::Value::Date(
        date.year() as u16,
        date.month() as u8,
        date.day() as u8,
        time.hour() as u8,
        time.minute() as u8,
        time.second() as u8,
        time.nanosecond() / 1000,
    )
}

async fn exec_many(conn: &mut Conn, sql: &str, param_sets: &[Vec<Value>]) -> Result<u64> {
    let stmt = conn
        .prep(sql)
        .await
        .map_err(|e| Error::query_with_sql(format!("failed to prepare statement: {}", e), sql))?;

    let mut total = 0;
    for params in param_sets {
        let mysql_params: Vec<mysql_async::Value> = params.iter().map(value_to_sql).collect();
        conn.exec_drop(stmt.clone(), mysql_params)
            .await
            .map_err(|e| Error::query_with_sql(format!("failed to execute: {}", e), sql))?;
        total += conn.affected_rows();
    }
    Ok(total)
}

/// MySQL connection implementation
pub struct MySqlConnection {
    conn: Arc<Mutex<Option<Conn>>>,
    database: String,
}

impl MySqlConnection {
    /// Wrap an established mysql_async connection
    pub fn new(conn: Conn, database: String) -> Self {
        Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            database,
        }
    }

    /// Database name this connection is connected to
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Open a connection from configuration
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let raw = config.url.strip_prefix("jdbc:").unwrap_or(&config.url);
        // mysql_async only understands the mysql:// scheme
        let normalized = match raw.split_once("://") {
            Some((_, rest)) => format!("mysql://{}", rest),
            None => raw.to_string(),
        };

        let opts = mysql_async::Opts::from_url(&normalized)
            .map_err(|e| Error::config(format!("invalid MySQL connection string: {}", e)))?;
        let database = opts.db_name().unwrap_or_default().to_string();

        let timeout = Duration::from_millis(config.connect_timeout_ms);
        let conn = tokio::time::timeout(timeout, Conn::new(OptsBuilder::from_opts(opts)))
            .await
            .map_err(|_| {
                Error::timeout(format!(
                    "connecting to MySQL took longer than {}ms",
                    config.connect_timeout_ms
                ))
            })?
            .map_err(|e| Error::connection_with_source("failed to connect to MySQL", e))?;

        Ok(Self::new(conn, database))
    }

    async fn take_conn(&self) -> Result<Conn> {
        self.conn
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::connection("connection not available"))
    }

    async fn put_conn(&self, conn: Conn) {
        *self.conn.lock().await = Some(conn);
    }
}

#[async_trait]
impl Connection for MySqlConnection {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut conn = self.take_conn().await?;
        let mysql_params: Vec<mysql_async::Value> = params.iter().map(value_to_sql).collect();
        let result = conn.exec_drop(sql, mysql_params).await;
        let affected = conn.affected_rows();
        self.put_conn(conn).await;

        result.map_err(|e| Error::query_with_sql(e.to_string(), sql))?;
        Ok(affected)
    }

    async fn execute_many(&self, sql: &str, param_sets: &[Vec<Value>]) -> Result<u64> {
        let mut conn = self.take_conn().await?;
        let result = exec_many(&mut conn, sql, param_sets).await;
        self.put_conn(conn).await;
        result
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let mut conn = self.take_conn().await?;

        if let Err(e) = conn.query_drop("BEGIN").await {
            self.put_conn(conn).await;
            return Err(Error::transaction_with_source("failed to begin transaction", e));
        }

        Ok(Box::new(MySqlTransaction {
            conn: Mutex::new(Some(conn)),
            parent_conn: Arc::clone(&self.conn),
        }))
    }

    async fn is_valid(&self) -> bool {
        match self.conn.lock().await.as_mut() {
            Some(conn) => conn.ping().await.is_ok(),
            None => false,
        }
    }

    async fn close(&self) -> Result<()> {
        if let Some(conn) = self.conn.lock().await.take() {
            conn.disconnect()
                .await
                .map_err(|e| Error::connection_with_source("failed to close connection", e))?;
        }
        Ok(())
    }
}

/// MySQL transaction
///
/// Borrows the parent connection's session for its lifetime and hands it
/// back on commit or rollback.
pub struct MySqlTransaction {
    conn: Mutex<Option<Conn>>,
    parent_conn: Arc<Mutex<Option<Conn>>>,
}

impl MySqlTransaction {
    async fn finish(&self, statement: &str) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let mut conn = guard
            .take()
            .ok_or_else(|| Error::transaction("transaction already completed"))?;

        let result = conn.query_drop(statement).await;
        *self.parent_conn.lock().await = Some(conn);

        result.map_err(|e| Error::transaction_with_source(format!("{} failed", statement), e))
    }
}

#[async_trait]
impl Transaction for MySqlTransaction {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::transaction("transaction not available"))?;

        let mysql_params: Vec<mysql_async::Value> = params.iter().map(value_to_sql).collect();
        conn.exec_drop(sql, mysql_params)
            .await
            .map_err(|e| Error::query_with_sql(e.to_string(), sql))?;

        Ok(conn.affected_rows())
    }

    async fn execute_many(&self, sql: &str, param_sets: &[Vec<Value>]) -> Result<u64> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::transaction("transaction not available"))?;
        exec_many(conn, sql, param_sets).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}

/// MySQL connection factory
#[derive(Debug, Clone, Default)]
pub struct MySqlConnectionFactory;

#[async_trait]
impl ConnectionFactory for MySqlConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let conn = MySqlConnection::connect(config).await?;
        Ok(Box::new(conn))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_decimal_binds_as_text() {
        let v = value_to_sql(&Value::Decimal(Decimal::from(u64::MAX)));
        assert_eq!(v, mysql_async::Value::from("18446744073709551615".to_string()));
    }

    #[test]
    fn test_factory_type() {
        assert_eq!(MySqlConnectionFactory.database_type(), DatabaseType::MySQL);
    }

    #[tokio::test]
    async fn test_connect_honours_timeout() {
        // non-routable address, the connect attempt can only end by timing out
        let config = ConnectionConfig::new("mysql://etl@10.255.255.1:3306/replica")
            .with_connect_timeout(50);

        let err = MySqlConnection::connect(&config).await.err().unwrap();

        assert!(err.is_retriable());
    }
}
