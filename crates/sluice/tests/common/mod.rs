//! Shared helpers for sluice integration tests
//!
//! `MemoryDb` is a tiny transactional table store that understands exactly
//! the MySQL-dialect statements the engine renders.

#![allow(dead_code)]

use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sluice::prelude::*;
use sluice_rdbc::prelude::{
    Connection, ConnectionConfig, ConnectionFactory, ConnectionPool, DatabaseType, PoolConfig,
    SimpleConnectionPool, Transaction, Value,
};

pub const TARGET_URL: &str = "mysql://mock/db";

pub type Record = IndexMap<String, Value>;
type Tables = HashMap<String, Vec<Record>>;

// ==================== Memory Target ====================

#[derive(Default)]
pub struct MemoryDb {
    tables: Mutex<Tables>,
    log: Mutex<Vec<String>>,
    fail_prefix: Mutex<Option<(String, bool)>>,
    executions: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

impl MemoryDb {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every statement starting with `prefix` fail with a query error
    pub fn fail_when(&self, prefix: &str) {
        *self.fail_prefix.lock().unwrap() = Some((prefix.to_string(), false));
    }

    /// Like [`MemoryDb::fail_when`], but the failure is a deadlock
    pub fn deadlock_when(&self, prefix: &str) {
        *self.fail_prefix.lock().unwrap() = Some((prefix.to_string(), true));
    }

    pub fn heal(&self) {
        *self.fail_prefix.lock().unwrap() = None;
    }

    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn find(&self, table: &str, column: &str, value: &Value) -> Option<Record> {
        self.rows(table)
            .into_iter()
            .find(|row| row.get(column) == Some(value))
    }

    /// Statement texts in execution order, one entry per execution
    pub fn statements(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    fn run(&self, tables: &mut Tables, sql: &str, params: &[Value]) -> sluice_rdbc::Result<u64> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(sql.to_string());

        if let Some((prefix, deadlock)) = self.fail_prefix.lock().unwrap().as_ref() {
            if sql.starts_with(prefix.as_str()) {
                return Err(if *deadlock {
                    sluice_rdbc::Error::Deadlock
                } else {
                    sluice_rdbc::Error::query_with_sql("injected failure", sql)
                });
            }
        }
        apply_sql(tables, sql, params)
    }
}

fn unquote(ident: &str) -> String {
    ident.trim().trim_matches('`').to_string()
}

fn assignments(list: &str, sep: &str) -> Vec<String> {
    list.split(sep)
        .map(|part| unquote(part.trim_end_matches("=?")))
        .collect()
}

fn row_matches(row: &Record, columns: &[String], values: &[Value]) -> bool {
    columns
        .iter()
        .zip(values)
        .all(|(column, value)| row.get(column) == Some(value))
}

fn parse_error(sql: &str) -> sluice_rdbc::Error {
    sluice_rdbc::Error::query_with_sql("unsupported statement", sql)
}

fn apply_sql(tables: &mut Tables, sql: &str, params: &[Value]) -> sluice_rdbc::Result<u64> {
    if let Some(rest) = sql.strip_prefix("INSERT INTO ") {
        let (table, rest) = rest.split_once(" (").ok_or_else(|| parse_error(sql))?;
        let (columns, _) = rest.split_once(") VALUES ").ok_or_else(|| parse_error(sql))?;
        let columns: Vec<String> = columns.split(',').map(unquote).collect();

        let target = tables.entry(unquote(table)).or_default();
        for values in params.chunks(columns.len()) {
            target.push(columns.iter().cloned().zip(values.iter().cloned()).collect());
        }
        return Ok((params.len() / columns.len()) as u64);
    }

    if let Some(rest) = sql.strip_prefix("UPDATE ") {
        let (table, rest) = rest.split_once(" SET ").ok_or_else(|| parse_error(sql))?;
        let (set, predicate) = rest.split_once(" WHERE ").ok_or_else(|| parse_error(sql))?;
        let set = assignments(set, ", ");
        let keys = assignments(predicate, " AND ");
        let (new_values, key_values) = params.split_at(set.len());

        let mut affected = 0;
        for row in tables.entry(unquote(table)).or_default().iter_mut() {
            if row_matches(row, &keys, key_values) {
                for (column, value) in set.iter().zip(new_values) {
                    row.insert(column.clone(), value.clone());
                }
                affected += 1;
            }
        }
        return Ok(affected);
    }

    if let Some(rest) = sql.strip_prefix("DELETE FROM ") {
        let (table, predicate) = rest.split_once(" WHERE ").ok_or_else(|| parse_error(sql))?;
        let keys = assignments(predicate, " AND ");

        let rows = tables.entry(unquote(table)).or_default();
        let before = rows.len();
        rows.retain(|row| !row_matches(row, &keys, params));
        return Ok((before - rows.len()) as u64);
    }

    Err(parse_error(sql))
}

struct MemoryTransaction {
    db: Arc<MemoryDb>,
    staged: Mutex<Tables>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn execute(&self, sql: &str, params: &[Value]) -> sluice_rdbc::Result<u64> {
        let mut staged = self.staged.lock().unwrap();
        self.db.run(&mut staged, sql, params)
    }

    async fn commit(self: Box<Self>) -> sluice_rdbc::Result<()> {
        let MemoryTransaction { db, staged } = *self;
        *db.tables.lock().unwrap() = staged.into_inner().unwrap();
        db.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> sluice_rdbc::Result<()> {
        self.db.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryConnection {
    db: Arc<MemoryDb>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute(&self, sql: &str, params: &[Value]) -> sluice_rdbc::Result<u64> {
        let mut tables = self.db.tables.lock().unwrap();
        self.db.run(&mut tables, sql, params)
    }

    async fn begin(&self) -> sluice_rdbc::Result<Box<dyn Transaction>> {
        let snapshot = self.db.tables.lock().unwrap().clone();
        Ok(Box::new(MemoryTransaction {
            db: Arc::clone(&self.db),
            staged: Mutex::new(snapshot),
        }))
    }

    async fn is_valid(&self) -> bool {
        true
    }

    async fn close(&self) -> sluice_rdbc::Result<()> {
        Ok(())
    }
}

struct MemoryFactory {
    db: Arc<MemoryDb>,
}

#[async_trait]
impl ConnectionFactory for MemoryFactory {
    async fn connect(&self, _config: &ConnectionConfig) -> sluice_rdbc::Result<Box<dyn Connection>> {
        Ok(Box::new(MemoryConnection {
            db: Arc::clone(&self.db),
        }))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }
}

pub async fn memory_pool(db: &Arc<MemoryDb>) -> Arc<dyn ConnectionPool> {
    let factory = Arc::new(MemoryFactory {
        db: Arc::clone(db),
    });
    SimpleConnectionPool::new(PoolConfig::new(TARGET_URL).with_max_size(2), factory)
        .await
        .unwrap()
}

pub async fn applier(db: &Arc<MemoryDb>, config: &ApplyConfig) -> Applier {
    Applier::new(memory_pool(db).await, config).unwrap()
}

pub fn utc_apply_config() -> ApplyConfig {
    ApplyConfig {
        utc_offset: Some("+00:00".into()),
        ..Default::default()
    }
}

// ==================== Event Builders ====================

pub fn pk() -> Vec<String> {
    vec!["id".to_string()]
}

pub fn user(id: i64, name: &str) -> RowImage {
    row_image([
        Column::key("id", SqlType::Integer, id),
        Column::new("name", SqlType::VarChar, name),
    ])
}

pub fn insert(rows: Vec<RowImage>) -> ChangeEvent {
    ChangeEvent::insert("shop", "users", pk(), rows)
}

pub fn update(rows: Vec<RowImage>, old: Vec<RowImage>) -> ChangeEvent {
    ChangeEvent::update("shop", "users", pk(), rows, old)
}

pub fn delete(rows: Vec<RowImage>) -> ChangeEvent {
    ChangeEvent::delete("shop", "users", pk(), rows)
}

pub fn name_of(record: &Record) -> Option<&str> {
    record.get("name").and_then(Value::as_str)
}
