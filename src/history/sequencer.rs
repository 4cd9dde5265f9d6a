use super::columns::read_sequence;
use super::error::{HistoryError, HistoryResult};
use super::options::HistoryStorage;
use crate::domain::ResourceId;
use crate::store::{Order, Transaction};

/// Next sequence number for `(resource_type, resource_id)`: one past the
/// highest recorded sequence, or 1 for a resource without history.
///
/// Must run in the transaction that inserts the row. The history table's
/// unique `(resource_type, resource_id, sequence)` constraint turns a lost
/// race into a [`HistoryError::Conflict`] at insert time.
pub async fn next_sequence(
    tx: &mut dyn Transaction,
    storage: &HistoryStorage,
    resource_type: &str,
    resource_id: &ResourceId,
) -> HistoryResult<u64> {
    let filter = storage.resource_filter(resource_type, resource_id);
    let latest = tx
        .find_one(
            &storage.table,
            &filter,
            Some(Order::desc(&storage.fields.sequence)),
        )
        .await?;

    let next = match latest {
        None => 1,
        Some(row) => {
            let last = row
                .get(&storage.fields.sequence)
                .and_then(read_sequence)
                .ok_or_else(|| {
                    HistoryError::Serialization(format!(
                        "history row for {}/{} has an unreadable sequence",
                        resource_type, resource_id
                    ))
                })?;
            last + 1
        }
    };

    tracing::debug!(resource_type, %resource_id, sequence = next, "assigned sequence");
    Ok(next)
}
