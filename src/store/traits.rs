use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// A stored row, keyed by column name.
pub type Row = Map<String, Value>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unique constraint on {table} ({}) violated", .columns.join(", "))]
    UniqueViolation { table: String, columns: Vec<String> },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Sort order for a single-column query.
#[derive(Debug, Clone, Copy)]
pub struct Order<'a> {
    pub column: &'a str,
    pub descending: bool,
}

impl<'a> Order<'a> {
    pub fn asc(column: &'a str) -> Self {
        Self {
            column,
            descending: false,
        }
    }

    pub fn desc(column: &'a str) -> Self {
        Self {
            column,
            descending: true,
        }
    }
}

/// Transactional datastore. Every read and write of the history engine goes
/// through a [`Transaction`] obtained here.
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>>;
}

/// An open transaction. Dropping it without calling [`Transaction::commit`]
/// discards its writes.
#[async_trait]
pub trait Transaction: Send {
    /// First row of `table` whose columns equal every entry of `filter`.
    async fn find_one(
        &mut self,
        table: &str,
        filter: &Row,
        order: Option<Order<'_>>,
    ) -> StoreResult<Option<Row>>;

    async fn find_all(
        &mut self,
        table: &str,
        filter: &Row,
        order: Option<Order<'_>>,
    ) -> StoreResult<Vec<Row>>;

    /// Inserts `row` and returns it as stored, with server defaults filled in.
    async fn insert(&mut self, table: &str, row: Row) -> StoreResult<Row>;

    /// Overwrites `values` on every row matching `filter`; returns the number
    /// of rows touched.
    async fn update(&mut self, table: &str, filter: &Row, values: &Row) -> StoreResult<u64>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
