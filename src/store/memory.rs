use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{Datastore, Order, Row, StoreError, StoreResult, Transaction};

/// How a table fills its key column when an insert leaves it empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Serial,
    Uuid,
}

#[derive(Debug, Clone, Default)]
pub struct TableSpec {
    key: Option<(String, KeyKind)>,
    timestamps: Vec<String>,
    unique: Vec<Vec<String>>,
}

impl TableSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, column: impl Into<String>, kind: KeyKind) -> Self {
        self.key = Some((column.into(), kind));
        self
    }

    /// Column filled with the insert time when left empty.
    pub fn timestamp(mut self, column: impl Into<String>) -> Self {
        self.timestamps.push(column.into());
        self
    }

    pub fn unique<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.unique
            .push(columns.iter().map(|c| c.as_ref().to_string()).collect());
        self
    }

    fn constraints(&self) -> impl Iterator<Item = Vec<String>> + '_ {
        self.key
            .iter()
            .map(|(column, _)| vec![column.clone()])
            .chain(self.unique.iter().cloned())
    }
}

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: HashMap<String, Vec<Row>>,
    serials: HashMap<String, i64>,
}

/// Transactional in-memory datastore.
///
/// Transactions are fully serialized: `begin` waits until the previous
/// transaction has committed, rolled back or been dropped. Writes land in a
/// private copy of the tables that replaces the shared state on commit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    specs: Arc<HashMap<String, TableSpec>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a table. Only meant for setup, before the store is shared.
    pub fn with_table(mut self, name: impl Into<String>, spec: TableSpec) -> Self {
        Arc::make_mut(&mut self.specs).insert(name.into(), spec);
        self
    }
}

#[async_trait]
impl Datastore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            specs: self.specs.clone(),
        }))
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    specs: Arc<HashMap<String, TableSpec>>,
}

impl MemoryTransaction {
    fn spec(&self, table: &str) -> StoreResult<&TableSpec> {
        self.specs
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))
    }

    fn select(&self, table: &str, filter: &Row, order: Option<Order<'_>>) -> StoreResult<Vec<Row>> {
        self.spec(table)?;
        let mut rows: Vec<Row> = self
            .working
            .rows
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches(row, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = order {
            rows.sort_by(|a, b| {
                let ordering = compare(a.get(order.column), b.get(order.column));
                if order.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }
        Ok(rows)
    }

    fn check_unique(&self, table: &str, candidate: &Row, skip: Option<usize>) -> StoreResult<()> {
        let spec = self.spec(table)?;
        let rows = self.working.rows.get(table).map(Vec::as_slice).unwrap_or(&[]);
        for columns in spec.constraints() {
            // SQL semantics: rows with a null in the constraint never collide
            if columns
                .iter()
                .any(|c| candidate.get(c).map_or(true, Value::is_null))
            {
                continue;
            }
            let taken = rows.iter().enumerate().any(|(idx, row)| {
                Some(idx) != skip && columns.iter().all(|c| row.get(c) == candidate.get(c))
            });
            if taken {
                return Err(StoreError::UniqueViolation {
                    table: table.to_string(),
                    columns,
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn find_one(
        &mut self,
        table: &str,
        filter: &Row,
        order: Option<Order<'_>>,
    ) -> StoreResult<Option<Row>> {
        Ok(self.select(table, filter, order)?.into_iter().next())
    }

    async fn find_all(
        &mut self,
        table: &str,
        filter: &Row,
        order: Option<Order<'_>>,
    ) -> StoreResult<Vec<Row>> {
        self.select(table, filter, order)
    }

    async fn insert(&mut self, table: &str, mut row: Row) -> StoreResult<Row> {
        let spec = self.spec(table)?.clone();

        if let Some((column, kind)) = &spec.key {
            let serial = self.working.serials.entry(table.to_string()).or_insert(0);
            match row.get(column) {
                None | Some(Value::Null) => {
                    let key = match kind {
                        KeyKind::Serial => {
                            *serial += 1;
                            Value::from(*serial)
                        }
                        KeyKind::Uuid => Value::String(uuid::Uuid::new_v4().to_string()),
                    };
                    row.insert(column.clone(), key);
                }
                Some(given) => {
                    if let Some(n) = given.as_i64() {
                        *serial = (*serial).max(n);
                    }
                }
            }
        }

        for column in &spec.timestamps {
            if row.get(column).map_or(true, Value::is_null) {
                row.insert(column.clone(), Value::String(Utc::now().to_rfc3339()));
            }
        }

        self.check_unique(table, &row, None)?;
        self.working
            .rows
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    async fn update(&mut self, table: &str, filter: &Row, values: &Row) -> StoreResult<u64> {
        self.spec(table)?;
        let targets: Vec<usize> = self
            .working
            .rows
            .get(table)
            .map(|rows| {
                rows.iter()
                    .enumerate()
                    .filter(|(_, row)| matches(row, filter))
                    .map(|(idx, _)| idx)
                    .collect()
            })
            .unwrap_or_default();

        for &idx in &targets {
            let mut updated = self.working.rows[table][idx].clone();
            for (column, value) in values {
                updated.insert(column.clone(), value.clone());
            }
            self.check_unique(table, &updated, Some(idx))?;
            if let Some(rows) = self.working.rows.get_mut(table) {
                rows[idx] = updated;
            }
        }
        Ok(targets.len() as u64)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

fn matches(row: &Row, filter: &Row) -> bool {
    filter
        .iter()
        .all(|(column, expected)| row.get(column) == Some(expected))
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn as_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

// Numeric when both sides read as numbers, lexical otherwise.
fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a.and_then(as_number), b.and_then(as_number)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => as_text(a).cmp(&as_text(b)),
    }
}
