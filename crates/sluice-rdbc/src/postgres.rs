//! PostgreSQL backend implementation for sluice-rdbc
//!
//! Covers PostgreSQL and wire-compatible stores:
//! - Connection with prepared batch execution
//! - Transactions via explicit BEGIN/COMMIT/ROLLBACK
//!
//! tokio-postgres checks every parameter against the type the server
//! inferred for its placeholder, so values are coerced to the prepared
//! statement's parameter types before binding.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_postgres::types::{ToSql, Type};
use tracing::error;

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, DatabaseType, Transaction};
use crate::error::{Error, Result};
use crate::types::Value;

type BoxedParam = Box<dyn ToSql + Sync + Send>;

fn mismatch(value: &Value, ty: &Type) -> Error {
    Error::type_conversion(format!(
        "cannot bind {} value to parameter of type {}",
        value.type_name(),
        ty
    ))
}

/// Typed NULL for a parameter of type `ty`
fn null_for(ty: &Type) -> BoxedParam {
    match *ty {
        Type::BOOL => Box::new(Option::<bool>::None),
        Type::INT2 => Box::new(Option::<i16>::None),
        Type::INT4 => Box::new(Option::<i32>::None),
        Type::INT8 => Box::new(Option::<i64>::None),
        Type::FLOAT4 => Box::new(Option::<f32>::None),
        Type::FLOAT8 => Box::new(Option::<f64>::None),
        Type::NUMERIC => Box::new(Option::<Decimal>::None),
        Type::BYTEA => Box::new(Option::<Vec<u8>>::None),
        Type::DATE => Box::new(Option::<NaiveDate>::None),
        Type::TIME => Box::new(Option::<NaiveTime>::None),
        Type::TIMESTAMP => Box::new(Option::<NaiveDateTime>::None),
        Type::TIMESTAMPTZ => Box::new(Option::<DateTime<Utc>>::None),
        _ => Box::new(Option::<String>::None),
    }
}

/// Natural mapping used when the target type is not one we coerce to
fn natural(value: &Value) -> BoxedParam {
    match value {
        Value::Null => Box::new(Option::<String>::None),
        Value::Bool(b) => Box::new(*b),
        Value::Int8(n) => Box::new(i16::from(*n)),
        Value::Int16(n) => Box::new(*n),
        Value::Int32(n) => Box::new(*n),
        Value::Int64(n) => Box::new(*n),
        Value::Float32(n) => Box::new(*n),
        Value::Float64(n) => Box::new(*n),
        Value::Decimal(d) => Box::new(*d),
        Value::String(s) => Box::new(s.clone()),
        Value::Bytes(b) => Box::new(b.clone()),
        Value::Date(d) => Box::new(*d),
        Value::Time(t) => Box::new(*t),
        Value::DateTime(dt) => Box::new(*dt),
        Value::DateTimeTz(dt) => Box::new(*dt),
    }
}

fn to_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Decimal(d) => Some(*d),
        Value::Int8(n) => Some(Decimal::from(*n)),
        Value::Int16(n) => Some(Decimal::from(*n)),
        Value::Int32(n) => Some(Decimal::from(*n)),
        Value::Int64(n) => Some(Decimal::from(*n)),
        Value::Float32(n) => Decimal::from_f32(*n),
        Value::Float64(n) => Decimal::from_f64(*n),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn to_datetime(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::DateTime(dt) => Some(*dt),
        Value::DateTimeTz(dt) => Some(dt.naive_utc()),
        Value::Date(d) => d.and_hms_opt(0, 0, 0),
        _ => None,
    }
}

/// Coerce `value` to a parameter accepted for placeholder type `ty`
fn coerce(value: &Value, ty: &Type) -> Result<BoxedParam> {
    if value.is_null() {
        return Ok(null_for(ty));
    }

    let param: Option<BoxedParam> = match *ty {
        Type::BOOL => value.as_bool().map(|b| Box::new(b) as BoxedParam),
        Type::INT2 => value
            .as_i64()
            .and_then(|n| i16::try_from(n).ok())
            .map(|n| Box::new(n) as BoxedParam),
        Type::INT4 => value
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .map(|n| Box::new(n) as BoxedParam),
        Type::INT8 => value.as_i64().map(|n| Box::new(n) as BoxedParam),
        Type::FLOAT4 => value.as_f64().map(|n| Box::new(n as f32) as BoxedParam),
        Type::FLOAT8 => value.as_f64().map(|n| Box::new(n) as BoxedParam),
        Type::NUMERIC => to_decimal(value).map(|d| Box::new(d) as BoxedParam),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            value.as_string().map(|s| Box::new(s) as BoxedParam)
        }
        Type::BYTEA => value.as_bytes().map(|b| Box::new(b.to_vec()) as BoxedParam),
        Type::DATE => match value {
            Value::Date(d) => Some(Box::new(*d) as BoxedParam),
            other => to_datetime(other).map(|dt| Box::new(dt.date()) as BoxedParam),
        },
        Type::TIME => match value {
            Value::Time(t) => Some(Box::new(*t) as BoxedParam),
            other => to_datetime(other).map(|dt| Box::new(dt.time()) as BoxedParam),
        },
        Type::TIMESTAMP => to_datetime(value).map(|dt| Box::new(dt) as BoxedParam),
        Type::TIMESTAMPTZ => to_datetime(value).map(|dt| Box::new(dt.and_utc()) as BoxedParam),
        _ => Some(natural(value)),
    };

    param.ok_or_else(|| mismatch(value, ty))
}

fn bind(statement: &tokio_postgres::Statement, params: &[Value]) -> Result<Vec<BoxedParam>> {
    let types = statement.params();
    if types.len() != params.len() {
        return Err(Error::query(format!(
            "statement expects {} parameters, got {}",
            types.len(),
            params.len()
        )));
    }
    params
        .iter()
        .zip(types)
        .map(|(value, ty)| coerce(value, ty))
        .collect()
}

fn as_refs(boxed: &[BoxedParam]) -> Vec<&(dyn ToSql + Sync)> {
    boxed
        .iter()
        .map(|b| b.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

async fn exec_prepared(
    client: &tokio_postgres::Client,
    sql: &str,
    param_sets: &[Vec<Value>],
) -> Result<u64> {
    let statement = client
        .prepare(sql)
        .await
        .map_err(|e| Error::query_with_sql(e.to_string(), sql))?;

    let mut total = 0;
    for params in param_sets {
        let boxed = bind(&statement, params)?;
        total += client
            .execute(&statement, &as_refs(&boxed))
            .await
            .map_err(|e| Error::query_with_sql(e.to_string(), sql))?;
    }
    Ok(total)
}

async fn simple(client: &tokio_postgres::Client, statement: &str) -> Result<()> {
    client
        .batch_execute(statement)
        .await
        .map_err(|e| Error::transaction_with_source(format!("{} failed", statement), e))
}

/// PostgreSQL connection implementation
pub struct PgConnection {
    client: Arc<tokio_postgres::Client>,
    closed: AtomicBool,
}

impl PgConnection {
    /// Create a new connection from a tokio-postgres client
    pub fn new(client: tokio_postgres::Client) -> Self {
        Self {
            client: Arc::new(client),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::connection("connection is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.ensure_open()?;
        exec_prepared(&self.client, sql, std::slice::from_ref(&params.to_vec())).await
    }

    async fn execute_many(&self, sql: &str, param_sets: &[Vec<Value>]) -> Result<u64> {
        self.ensure_open()?;
        exec_prepared(&self.client, sql, param_sets).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.ensure_open()?;
        simple(&self.client, "BEGIN").await?;
        Ok(Box::new(PgTransaction {
            client: Arc::clone(&self.client),
        }))
    }

    async fn is_valid(&self) -> bool {
        if self.closed.load(Ordering::Relaxed) {
            return false;
        }
        self.client.simple_query("SELECT 1").await.is_ok()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// PostgreSQL transaction
pub struct PgTransaction {
    client: Arc<tokio_postgres::Client>,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        exec_prepared(&self.client, sql, std::slice::from_ref(&params.to_vec())).await
    }

    async fn execute_many(&self, sql: &str, param_sets: &[Vec<Value>]) -> Result<u64> {
        exec_prepared(&self.client, sql, param_sets).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        simple(&self.client, "COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        simple(&self.client, "ROLLBACK").await
    }
}

/// PostgreSQL connection factory
#[derive(Debug, Clone, Default)]
pub struct PgConnectionFactory;

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let raw = config.url.strip_prefix("jdbc:").unwrap_or(&config.url);
        let url = match raw.split_once("://") {
            Some((_, rest)) => format!("postgresql://{}", rest),
            None => raw.to_string(),
        };

        let mut pg_config: tokio_postgres::Config = url
            .parse()
            .map_err(|e| Error::config(format!("invalid PostgreSQL connection string: {}", e)))?;
        pg_config.connect_timeout(std::time::Duration::from_millis(config.connect_timeout_ms));
        if let Some(name) = &config.application_name {
            pg_config.application_name(name);
        }

        let (client, connection) = pg_config
            .connect(tokio_postgres::NoTls)
            .await
            .map_err(|e| Error::connection_with_source("failed to connect", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection terminated");
            }
        });

        Ok(Box::new(PgConnection::new(client)))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }
}
