//! Versioning core: every tracked mutation appends an immutable, sequenced
//! snapshot that can later be diffed against or restored.
//!
//! Every public operation takes an optional caller transaction. With one, the
//! operation runs inside it and leaves commit/rollback to the caller. Without
//! one, it opens its own transaction and commits only if every step succeeded.

pub mod columns;
pub mod diff;
pub mod error;
pub mod lifecycle;
pub mod options;
pub mod recorder;
pub mod revert;
pub mod sequencer;

use std::sync::Arc;

pub use diff::{Change, Diff};
pub use error::{HistoryError, HistoryResult};
pub use lifecycle::{CapturedState, MutationOptions};
pub use options::{
    AuthorResolver, AutoHistory, DataFormat, FieldNames, HistoryOptions, HistoryStorage, Hook,
    Registry, TrackedType,
};

use crate::domain::{Attributes, HistoryEntry, Operation, Resource, ResourceId};
use crate::store::{Datastore, Order, Transaction};

/// Transaction an operation runs in: borrowed from the caller, or opened
/// (and finished) by the operation itself.
pub(crate) enum Scope<'a> {
    Caller(&'a mut dyn Transaction),
    Owned(Box<dyn Transaction>),
}

impl<'a> Scope<'a> {
    pub(crate) async fn open(
        store: &dyn Datastore,
        tx: Option<&'a mut dyn Transaction>,
    ) -> HistoryResult<Scope<'a>> {
        match tx {
            Some(tx) => Ok(Scope::Caller(tx)),
            None => {
                tracing::debug!("opening own transaction");
                Ok(Scope::Owned(store.begin().await?))
            }
        }
    }

    pub(crate) fn tx(&mut self) -> &mut dyn Transaction {
        match self {
            Scope::Caller(tx) => &mut **tx,
            Scope::Owned(tx) => tx.as_mut(),
        }
    }

    pub(crate) async fn finish<T>(self, result: HistoryResult<T>) -> HistoryResult<T> {
        let tx = match self {
            Scope::Caller(_) => return result,
            Scope::Owned(tx) => tx,
        };
        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

/// History engine bound to a datastore and the per-type configuration.
#[derive(Clone)]
pub struct History {
    store: Arc<dyn Datastore>,
    registry: Arc<Registry>,
}

impl History {
    pub fn new(store: Arc<dyn Datastore>, registry: Registry) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
        }
    }

    pub fn store(&self) -> &Arc<dyn Datastore> {
        &self.store
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Storage backing `kind`'s history, or `None` when it is not tracked.
    pub fn history_model(&self, kind: &str) -> Option<&HistoryStorage> {
        self.registry.history_model(kind)
    }

    /// Appends a snapshot of `resource`. `previous` is the state captured
    /// before the mutation; when present the entry carries a diff against it.
    pub async fn record(
        &self,
        resource: &Resource,
        previous: Option<&Attributes>,
        patch: bool,
        operation: Operation,
        tx: Option<&mut dyn Transaction>,
    ) -> HistoryResult<HistoryEntry> {
        let tracked = self.registry.tracked(&resource.kind)?;
        let mut scope = Scope::open(self.store.as_ref(), tx).await?;
        let result =
            recorder::record_in(scope.tx(), tracked, resource, previous, patch, operation).await;
        scope.finish(result).await
    }

    /// Loads the live row of `kind`/`id` and records it as a manual snapshot.
    pub async fn backup(
        &self,
        kind: &str,
        id: &ResourceId,
        tx: Option<&mut dyn Transaction>,
    ) -> HistoryResult<HistoryEntry> {
        let tracked = self.registry.tracked(kind)?;
        let mut scope = Scope::open(self.store.as_ref(), tx).await?;
        let result = recorder::backup_in(scope.tx(), tracked, id).await;
        scope.finish(result).await
    }

    /// Restores `kind`/`id` to the entry with `sequence`, or to the latest
    /// entry. Returns the number of live rows overwritten (0 or 1).
    pub async fn revert(
        &self,
        kind: &str,
        id: &ResourceId,
        sequence: Option<u64>,
        tx: Option<&mut dyn Transaction>,
    ) -> HistoryResult<u64> {
        let tracked = self.registry.tracked(kind)?;
        let mut scope = Scope::open(self.store.as_ref(), tx).await?;
        let result = revert::revert_in(scope.tx(), tracked, id, sequence).await;
        scope.finish(result).await
    }

    /// Every entry recorded for `kind`/`id`, oldest first.
    pub async fn entries(
        &self,
        kind: &str,
        id: &ResourceId,
        tx: Option<&mut dyn Transaction>,
    ) -> HistoryResult<Vec<HistoryEntry>> {
        let storage = &self.registry.tracked(kind)?.storage;
        let mut scope = Scope::open(self.store.as_ref(), tx).await?;
        let result = entries_in(scope.tx(), storage, kind, id).await;
        scope.finish(result).await
    }
}

async fn entries_in(
    tx: &mut dyn Transaction,
    storage: &HistoryStorage,
    kind: &str,
    id: &ResourceId,
) -> HistoryResult<Vec<HistoryEntry>> {
    let rows = tx
        .find_all(
            &storage.table,
            &storage.resource_filter(kind, id),
            Some(Order::asc(&storage.fields.sequence)),
        )
        .await?;
    rows.iter().map(|row| storage.decode(row)).collect()
}
