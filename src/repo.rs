//! Host-side data mapper: creates and updates resource rows and drives the
//! history interceptor around each write, the way an ORM's save hooks would.

use crate::domain::{Attributes, Resource, ResourceId};
use crate::history::{
    CapturedState, History, HistoryError, HistoryResult, Hook, MutationOptions, Scope,
};
use crate::store::{Row, Transaction};

pub struct Repository {
    history: History,
}

impl Repository {
    pub fn new(history: History) -> Self {
        Self { history }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    fn id_attribute<'k>(&'k self, kind: &str) -> &'k str {
        self.history
            .registry()
            .get(kind)
            .map_or("id", |tracked| tracked.id_attribute.as_str())
    }

    fn id_filter(&self, kind: &str, id: &ResourceId) -> Row {
        let mut filter = Row::new();
        filter.insert(self.id_attribute(kind).to_string(), id.to_value());
        filter
    }

    pub async fn fetch(
        &self,
        kind: &str,
        id: &ResourceId,
        tx: Option<&mut dyn Transaction>,
    ) -> HistoryResult<Option<Resource>> {
        let mut scope = Scope::open(self.history.store().as_ref(), tx).await?;
        let filter = self.id_filter(kind, id);
        let result = scope
            .tx()
            .find_one(kind, &filter, None)
            .await
            .map(|row| row.map(|row| Resource::new(kind, row)))
            .map_err(HistoryError::from);
        scope.finish(result).await
    }

    /// Inserts a new row and records the `created` snapshot in the same
    /// transaction.
    pub async fn create(
        &self,
        kind: &str,
        attributes: Attributes,
        options: MutationOptions<'_>,
    ) -> HistoryResult<Resource> {
        let MutationOptions {
            history,
            patch,
            transacting,
        } = options;
        let mut scope = Scope::open(self.history.store().as_ref(), transacting).await?;
        let result = self
            .create_in(scope.tx(), kind, attributes, history, patch)
            .await;
        scope.finish(result).await
    }

    async fn create_in(
        &self,
        tx: &mut dyn Transaction,
        kind: &str,
        attributes: Attributes,
        history: bool,
        patch: bool,
    ) -> HistoryResult<Resource> {
        let candidate = Resource::new(kind, attributes);
        let captured = self.history.before_mutate(Hook::Created, &candidate);

        let row = tx.insert(kind, candidate.attributes).await?;
        let resource = Resource::new(kind, row);

        self.history
            .after_mutate(
                Hook::Created,
                &resource,
                captured,
                MutationOptions {
                    history,
                    patch,
                    transacting: Some(tx),
                },
            )
            .await?;
        Ok(resource)
    }

    /// Applies `changes` to the row of `id` and records the `updated`
    /// snapshot, diffed against the row as it was before.
    pub async fn update(
        &self,
        kind: &str,
        id: &ResourceId,
        changes: Attributes,
        options: MutationOptions<'_>,
    ) -> HistoryResult<Resource> {
        let MutationOptions {
            history,
            patch,
            transacting,
        } = options;
        let mut scope = Scope::open(self.history.store().as_ref(), transacting).await?;
        let result = self
            .update_in(scope.tx(), kind, id, changes, history, patch)
            .await;
        scope.finish(result).await
    }

    async fn update_in(
        &self,
        tx: &mut dyn Transaction,
        kind: &str,
        id: &ResourceId,
        changes: Attributes,
        history: bool,
        patch: bool,
    ) -> HistoryResult<Resource> {
        let filter = self.id_filter(kind, id);
        let persisted = tx
            .find_one(kind, &filter, None)
            .await?
            .map(|row| Resource::new(kind, row))
            .ok_or_else(|| HistoryError::NotFound(format!("{} {} does not exist", kind, id)))?;

        let captured: CapturedState = self.history.before_mutate(Hook::Updated, &persisted);
        tx.update(kind, &filter, &changes).await?;

        let mut resource = persisted;
        resource.attributes.extend(changes);

        self.history
            .after_mutate(
                Hook::Updated,
                &resource,
                captured,
                MutationOptions {
                    history,
                    patch,
                    transacting: Some(tx),
                },
            )
            .await?;
        Ok(resource)
    }
}
