use super::columns::read_sequence;
use super::error::{HistoryError, HistoryResult};
use super::options::TrackedType;
use crate::domain::ResourceId;
use crate::store::{Order, Row, Transaction};

/// Restores the live row of `resource_id` to a recorded snapshot: the entry
/// with `sequence`, or the latest entry when `sequence` is `None`.
///
/// The snapshot is written with a plain update on the resource table. No
/// lifecycle notification runs, so the revert itself is not recorded and no
/// host validation or derived-field computation is applied: the stored
/// attributes are restored exactly. Returns the number of rows touched.
pub(crate) async fn revert_in(
    tx: &mut dyn Transaction,
    tracked: &TrackedType,
    resource_id: &ResourceId,
    sequence: Option<u64>,
) -> HistoryResult<u64> {
    let storage = &tracked.storage;
    let filter = storage.resource_filter(&tracked.kind, resource_id);
    let row = match sequence {
        // Sequences may be stored as numeric strings, so match on the
        // decoded value rather than by column equality.
        Some(sequence) => tx
            .find_all(&storage.table, &filter, None)
            .await?
            .into_iter()
            .find(|row| {
                row.get(&storage.fields.sequence)
                    .and_then(read_sequence)
                    == Some(sequence)
            }),
        None => {
            tx.find_one(&storage.table, &filter, Some(Order::desc(&storage.fields.sequence)))
                .await?
        }
    };
    let row = row.ok_or_else(|| {
        HistoryError::NotFound(match sequence {
            Some(sequence) => format!(
                "no history entry {} for {}/{}",
                sequence, tracked.kind, resource_id
            ),
            None => format!("no history for {}/{}", tracked.kind, resource_id),
        })
    })?;

    let mut data = storage.data_of(&row)?;
    // The live row keeps its own identity.
    data.remove(&tracked.id_attribute);

    let mut target = Row::new();
    target.insert(tracked.id_attribute.clone(), resource_id.to_value());
    let affected = tx.update(&tracked.kind, &target, &data).await?;

    tracing::info!(
        resource_type = %tracked.kind,
        %resource_id,
        sequence = ?sequence,
        affected,
        "reverted resource"
    );
    Ok(affected)
}
