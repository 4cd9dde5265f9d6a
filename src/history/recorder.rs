use super::columns::NewEntry;
use super::diff::diff;
use super::error::{HistoryError, HistoryResult};
use super::options::TrackedType;
use super::sequencer::next_sequence;
use crate::domain::{Attributes, HistoryEntry, Operation, Resource, ResourceId};
use crate::store::{Row, StoreError, Transaction};

/// Writes one history row for `resource` inside `tx`.
///
/// `previous` is the pre-mutation state captured before the write, if any;
/// it only feeds the `changed` diff.
pub(crate) async fn record_in(
    tx: &mut dyn Transaction,
    tracked: &TrackedType,
    resource: &Resource,
    previous: Option<&Attributes>,
    patch: bool,
    operation: Operation,
) -> HistoryResult<HistoryEntry> {
    let resource_id = resource.id(&tracked.id_attribute).ok_or_else(|| {
        HistoryError::InvalidResource(format!(
            "{} resource has no usable `{}` attribute",
            resource.kind, tracked.id_attribute
        ))
    })?;
    let storage = &tracked.storage;

    let sequence = next_sequence(tx, storage, &resource.kind, &resource_id).await?;
    let author = tracked.author_of(resource);
    let changed = diff(previous, &resource.attributes);

    let row = storage.encode(&NewEntry {
        resource_type: &resource.kind,
        resource_id: &resource_id,
        sequence,
        operation,
        patch,
        data: &resource.attributes,
        changed: changed.as_ref(),
        author: author.as_ref(),
    })?;

    let stored = tx
        .insert(&storage.table, row)
        .await
        .map_err(|e| match e {
            StoreError::UniqueViolation { .. } => HistoryError::Conflict {
                resource_type: resource.kind.clone(),
                resource_id: resource_id.clone(),
                sequence,
            },
            other => HistoryError::Store(other),
        })?;

    tracing::info!(
        resource_type = %resource.kind,
        %resource_id,
        sequence,
        %operation,
        patch,
        "recorded history entry"
    );
    storage.decode(&stored)
}

/// Records the live row of `tracked.kind`/`id` as a manual snapshot.
pub(crate) async fn backup_in(
    tx: &mut dyn Transaction,
    tracked: &TrackedType,
    id: &ResourceId,
) -> HistoryResult<HistoryEntry> {
    let mut filter = Row::new();
    filter.insert(tracked.id_attribute.clone(), id.to_value());
    let row = tx
        .find_one(&tracked.kind, &filter, None)
        .await?
        .ok_or_else(|| HistoryError::NotFound(format!("{} {} does not exist", tracked.kind, id)))?;

    let resource = Resource::new(tracked.kind.clone(), row);
    record_in(tx, tracked, &resource, None, false, Operation::Manual).await
}
