//! Mapping between [`HistoryEntry`] and stored rows. Column names and the
//! JSON layout are only applied here.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::diff::Diff;
use super::error::{HistoryError, HistoryResult};
use super::options::{DataFormat, HistoryStorage};
use crate::domain::resource::json_kind;
use crate::domain::{Attributes, Author, HistoryEntry, Operation, ResourceId};
use crate::store::Row;

/// A history row about to be inserted.
pub(crate) struct NewEntry<'a> {
    pub resource_type: &'a str,
    pub resource_id: &'a ResourceId,
    pub sequence: u64,
    pub operation: Operation,
    pub patch: bool,
    pub data: &'a Attributes,
    pub changed: Option<&'a Diff>,
    pub author: Option<&'a Author>,
}

impl HistoryStorage {
    pub(crate) fn resource_filter(&self, resource_type: &str, resource_id: &ResourceId) -> Row {
        let mut filter = Row::new();
        filter.insert(
            self.fields.resource_type.clone(),
            Value::String(resource_type.to_string()),
        );
        filter.insert(self.fields.resource_id.clone(), resource_id.to_value());
        filter
    }

    pub(crate) fn encode(&self, entry: &NewEntry<'_>) -> HistoryResult<Row> {
        let fields = &self.fields;
        let mut row = self.resource_filter(entry.resource_type, entry.resource_id);
        row.insert(fields.sequence.clone(), Value::from(entry.sequence));
        row.insert(
            fields.operation.clone(),
            Value::String(entry.operation.as_str().to_string()),
        );
        row.insert(fields.patch.clone(), Value::Bool(entry.patch));
        row.insert(fields.data.clone(), self.encode_json(entry.data)?);

        if let Some(changed) = entry.changed {
            row.insert(fields.changed.clone(), self.encode_json(changed)?);
        }
        if let Some(author) = entry.author {
            row.insert(fields.author_id.clone(), author.id.clone());
            row.insert(
                fields.author_type.clone(),
                Value::String(author.source.clone()),
            );
        }
        Ok(row)
    }

    fn encode_json<T: serde::Serialize>(&self, value: &T) -> HistoryResult<Value> {
        Ok(match self.format {
            DataFormat::Text => Value::String(serde_json::to_string(value)?),
            DataFormat::Json => serde_json::to_value(value)?,
        })
    }

    /// Snapshot stored in `row`, whether the column holds JSON text or a
    /// native JSON value.
    pub(crate) fn data_of(&self, row: &Row) -> HistoryResult<Attributes> {
        match row.get(&self.fields.data) {
            None | Some(Value::Null) => Ok(Attributes::new()),
            Some(Value::String(text)) => match serde_json::from_str::<Value>(text)? {
                Value::Object(map) => Ok(map),
                other => Err(not_an_object(&self.fields.data, &other)),
            },
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(other) => Err(not_an_object(&self.fields.data, other)),
        }
    }

    pub fn decode(&self, row: &Row) -> HistoryResult<HistoryEntry> {
        let fields = &self.fields;

        let resource_type = row
            .get(&fields.resource_type)
            .and_then(Value::as_str)
            .ok_or_else(|| malformed(&fields.resource_type))?
            .to_string();
        let resource_id = row
            .get(&fields.resource_id)
            .and_then(ResourceId::from_value)
            .ok_or_else(|| malformed(&fields.resource_id))?;
        let sequence = row
            .get(&fields.sequence)
            .and_then(read_sequence)
            .ok_or_else(|| malformed(&fields.sequence))?;
        let operation = row
            .get(&fields.operation)
            .and_then(Value::as_str)
            .and_then(Operation::parse)
            .ok_or_else(|| malformed(&fields.operation))?;
        let patch = match row.get(&fields.patch) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64() == Some(1),
            _ => return Err(malformed(&fields.patch)),
        };

        let changed = match row.get(&fields.changed) {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(serde_json::from_str(text)?),
            Some(value) => Some(serde_json::from_value(value.clone())?),
        };

        let author = match row.get(&fields.author_id) {
            None | Some(Value::Null) => None,
            Some(id) => Some(Author {
                id: id.clone(),
                source: row
                    .get(&fields.author_type)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
        };

        let created_at = row
            .get(&fields.created_at)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));

        Ok(HistoryEntry {
            id: row.get(&fields.id).cloned().unwrap_or(Value::Null),
            resource_type,
            resource_id,
            sequence,
            operation,
            patch,
            data: self.data_of(row)?,
            changed,
            author,
            created_at,
        })
    }
}

/// Sequence column value; drivers may hand back integers as strings.
pub(crate) fn read_sequence(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn malformed(column: &str) -> HistoryError {
    HistoryError::Serialization(format!("history column `{}` is missing or malformed", column))
}

fn not_an_object(column: &str, value: &Value) -> HistoryError {
    HistoryError::Serialization(format!(
        "history column `{}` holds {} instead of an attribute map",
        column,
        json_kind(value)
    ))
}
