use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Deserialize;

use super::error::{HistoryError, HistoryResult};
use crate::domain::{Author, Operation, Resource};
use crate::store::{KeyKind, TableSpec};

pub const DEFAULT_STORAGE: &str = "history";

/// Host callback resolving who performed a mutation.
pub type AuthorResolver = Arc<dyn Fn(&Resource) -> Option<Author> + Send + Sync>;

/// Lifecycle notification that can trigger a snapshot automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    Created,
    Updated,
}

impl Hook {
    pub const ALL: [Hook; 2] = [Hook::Created, Hook::Updated];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|hook| hook.as_str() == name)
    }
}

impl From<Hook> for Operation {
    fn from(hook: Hook) -> Self {
        match hook {
            Hook::Created => Operation::Created,
            Hook::Updated => Operation::Updated,
        }
    }
}

/// How `data` and `changed` are laid out in the history table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    /// JSON serialized into a text column.
    #[default]
    Text,
    /// Native JSON column.
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AutoHistory {
    Enabled(bool),
    Hooks(Vec<String>),
}

/// Column names of the history table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldNames {
    pub id: String,
    pub sequence: String,
    pub resource_id: String,
    pub resource_type: String,
    pub author_id: String,
    pub author_type: String,
    pub data: String,
    pub changed: String,
    pub patch: String,
    pub operation: String,
    pub created_at: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            id: "id".into(),
            sequence: "sequence".into(),
            resource_id: "resource_id".into(),
            resource_type: "resource_type".into(),
            author_id: "author_id".into(),
            author_type: "author_type".into(),
            data: "data".into(),
            changed: "changed".into(),
            patch: "patch".into(),
            operation: "operation".into(),
            created_at: "created_at".into(),
        }
    }
}

impl FieldNames {
    fn slot(&mut self, logical: &str) -> Option<&mut String> {
        Some(match logical {
            "id" => &mut self.id,
            "sequence" => &mut self.sequence,
            "resource_id" => &mut self.resource_id,
            "resource_type" => &mut self.resource_type,
            "author_id" => &mut self.author_id,
            "author_type" => &mut self.author_type,
            "data" => &mut self.data,
            "changed" => &mut self.changed,
            "patch" => &mut self.patch,
            "operation" => &mut self.operation,
            "created_at" => &mut self.created_at,
            _ => return None,
        })
    }

    fn all(&self) -> [&str; 11] {
        [
            &self.id,
            &self.sequence,
            &self.resource_id,
            &self.resource_type,
            &self.author_id,
            &self.author_type,
            &self.data,
            &self.changed,
            &self.patch,
            &self.operation,
            &self.created_at,
        ]
    }

    /// Applies `logical name -> column name` overrides.
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, String>) -> HistoryResult<Self> {
        for (logical, column) in overrides {
            let slot = self.slot(logical).ok_or_else(|| {
                HistoryError::InvalidConfiguration(format!("unknown history field `{}`", logical))
            })?;
            *slot = column.clone();
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> HistoryResult<()> {
        let columns = self.all();
        if columns.iter().any(|c| c.trim().is_empty()) {
            return Err(HistoryError::InvalidConfiguration(
                "history field names must not be empty".into(),
            ));
        }
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].contains(column) {
                return Err(HistoryError::InvalidConfiguration(format!(
                    "history column `{}` is mapped more than once",
                    column
                )));
            }
        }
        Ok(())
    }
}

/// Where a resource type's history lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryStorage {
    pub table: String,
    pub format: DataFormat,
    pub fields: FieldNames,
}

impl HistoryStorage {
    /// Table layout for the in-memory store: UUID key, insert timestamp and the
    /// per-resource sequence uniqueness constraint.
    pub fn table_spec(&self) -> TableSpec {
        TableSpec::new()
            .key(self.fields.id.clone(), KeyKind::Uuid)
            .timestamp(self.fields.created_at.clone())
            .unique(&[
                &self.fields.resource_type,
                &self.fields.resource_id,
                &self.fields.sequence,
            ])
    }
}

/// Partial history settings, as found in the config file. Defaults and
/// per-type overrides are merged once at registration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistoryOptions {
    pub enabled: Option<bool>,
    pub storage: Option<String>,
    pub format: Option<DataFormat>,
    pub auto_history: Option<AutoHistory>,
    pub id_attribute: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl HistoryOptions {
    pub fn merged(&self, over: &HistoryOptions) -> HistoryOptions {
        let mut fields = self.fields.clone();
        fields.extend(over.fields.clone());
        HistoryOptions {
            enabled: over.enabled.or(self.enabled),
            storage: over.storage.clone().or_else(|| self.storage.clone()),
            format: over.format.or(self.format),
            auto_history: over
                .auto_history
                .clone()
                .or_else(|| self.auto_history.clone()),
            id_attribute: over
                .id_attribute
                .clone()
                .or_else(|| self.id_attribute.clone()),
            fields,
        }
    }
}

fn resolve_hooks(auto: Option<&AutoHistory>) -> HistoryResult<Vec<Hook>> {
    match auto {
        None | Some(AutoHistory::Enabled(true)) => Ok(Hook::ALL.to_vec()),
        Some(AutoHistory::Enabled(false)) => Ok(Vec::new()),
        Some(AutoHistory::Hooks(names)) => {
            let invalid: Vec<&str> = names
                .iter()
                .map(String::as_str)
                .filter(|name| Hook::parse(name).is_none())
                .collect();
            if !invalid.is_empty() {
                return Err(HistoryError::InvalidConfiguration(format!(
                    "auto_history contains invalid options [{}]",
                    invalid.join(",")
                )));
            }
            let mut hooks: Vec<Hook> = Vec::new();
            for hook in names.iter().filter_map(|n| Hook::parse(n)) {
                if !hooks.contains(&hook) {
                    hooks.push(hook);
                }
            }
            Ok(hooks)
        }
    }
}

/// Fully resolved, immutable history configuration of one resource type.
pub struct TrackedType {
    pub kind: String,
    pub id_attribute: String,
    pub storage: HistoryStorage,
    pub auto_history: Vec<Hook>,
    author: Option<AuthorResolver>,
}

impl TrackedType {
    fn resolve(
        kind: &str,
        options: &HistoryOptions,
        author: Option<AuthorResolver>,
    ) -> HistoryResult<Self> {
        let auto_history = resolve_hooks(options.auto_history.as_ref())?;
        let fields = FieldNames::default().with_overrides(&options.fields)?;
        let table = options
            .storage
            .clone()
            .unwrap_or_else(|| DEFAULT_STORAGE.to_string());
        if table.trim().is_empty() {
            return Err(HistoryError::InvalidConfiguration(
                "history storage name must not be empty".into(),
            ));
        }
        Ok(Self {
            kind: kind.to_string(),
            id_attribute: options.id_attribute.clone().unwrap_or_else(|| "id".into()),
            storage: HistoryStorage {
                table,
                format: options.format.unwrap_or_default(),
                fields,
            },
            auto_history,
            author,
        })
    }

    pub fn records(&self, hook: Hook) -> bool {
        self.auto_history.contains(&hook)
    }

    pub fn author_of(&self, resource: &Resource) -> Option<Author> {
        self.author.as_ref().and_then(|resolve| resolve(resource))
    }
}

impl std::fmt::Debug for TrackedType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedType")
            .field("kind", &self.kind)
            .field("id_attribute", &self.id_attribute)
            .field("storage", &self.storage)
            .field("auto_history", &self.auto_history)
            .field("author", &self.author.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
enum Tracking {
    Disabled,
    Enabled(Arc<TrackedType>),
}

/// History configuration for every resource type known to the host.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    defaults: HistoryOptions,
    types: HashMap<String, Tracking>,
}

impl Registry {
    pub fn new(defaults: HistoryOptions) -> HistoryResult<Self> {
        // Surface bad defaults now rather than at the first registration.
        TrackedType::resolve("", &defaults, None)?;
        Ok(Self {
            defaults,
            types: HashMap::new(),
        })
    }

    pub fn register(&mut self, kind: &str, options: HistoryOptions) -> HistoryResult<()> {
        self.register_with_author(kind, options, None)
    }

    pub fn register_with_author(
        &mut self,
        kind: &str,
        options: HistoryOptions,
        author: Option<AuthorResolver>,
    ) -> HistoryResult<()> {
        let merged = self.defaults.merged(&options);
        let tracking = if merged.enabled == Some(false) {
            Tracking::Disabled
        } else {
            Tracking::Enabled(Arc::new(TrackedType::resolve(kind, &merged, author)?))
        };
        tracing::debug!(kind, ?tracking, "registered resource type");
        self.types.insert(kind.to_string(), tracking);
        Ok(())
    }

    pub fn disable(&mut self, kind: &str) {
        self.types.insert(kind.to_string(), Tracking::Disabled);
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<TrackedType>> {
        match self.types.get(kind) {
            Some(Tracking::Enabled(tracked)) => Some(tracked),
            _ => None,
        }
    }

    pub fn tracked(&self, kind: &str) -> HistoryResult<&Arc<TrackedType>> {
        self.get(kind)
            .ok_or_else(|| HistoryError::Untracked(kind.to_string()))
    }

    /// Storage backing `kind`'s history, or `None` when history is off for it.
    pub fn history_model(&self, kind: &str) -> Option<&HistoryStorage> {
        self.get(kind).map(|tracked| &tracked.storage)
    }

    /// Distinct history storages, for provisioning.
    pub fn storages(&self) -> Vec<&HistoryStorage> {
        let mut storages: Vec<&HistoryStorage> = Vec::new();
        for tracked in self.types.values() {
            if let Tracking::Enabled(tracked) = tracked {
                if !storages.iter().any(|s| s.table == tracked.storage.table) {
                    storages.push(&tracked.storage);
                }
            }
        }
        storages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hooks(names: &[&str]) -> HistoryOptions {
        HistoryOptions {
            auto_history: Some(AutoHistory::Hooks(
                names.iter().map(|n| n.to_string()).collect(),
            )),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_record_both_hooks_into_history_table() {
        let mut registry = Registry::default();
        registry.register("test", HistoryOptions::default()).expect("valid");

        let tracked = registry.tracked("test").expect("tracked");
        assert!(tracked.records(Hook::Created));
        assert!(tracked.records(Hook::Updated));
        assert_eq!(tracked.id_attribute, "id");
        assert_eq!(tracked.storage.table, "history");
        assert_eq!(tracked.storage.format, DataFormat::Text);
        assert_eq!(tracked.storage.fields, FieldNames::default());
    }

    #[test]
    fn unknown_hooks_are_rejected_with_every_name() {
        let mut registry = Registry::default();
        let err = registry
            .register("test", hooks(&["created", "deleted", "saved"]))
            .unwrap_err();
        assert!(matches!(err, HistoryError::InvalidConfiguration(_)));
        assert!(err.to_string().contains("[deleted,saved]"));
        assert!(registry.get("test").is_none());
    }

    #[test]
    fn repeated_hooks_are_kept_once() {
        let mut registry = Registry::default();
        registry
            .register("test", hooks(&["created", "updated", "created"]))
            .expect("valid");
        let tracked = registry.tracked("test").expect("tracked");
        assert_eq!(tracked.auto_history, vec![Hook::Created, Hook::Updated]);
    }

    #[test]
    fn auto_history_false_disables_hooks_only() {
        let mut registry = Registry::default();
        registry
            .register(
                "test",
                HistoryOptions {
                    auto_history: Some(AutoHistory::Enabled(false)),
                    ..Default::default()
                },
            )
            .expect("valid");
        let tracked = registry.tracked("test").expect("still tracked");
        assert!(tracked.auto_history.is_empty());
        assert!(registry.history_model("test").is_some());
    }

    #[test]
    fn overrides_merge_over_defaults() {
        let defaults = HistoryOptions {
            storage: Some("audit".into()),
            fields: BTreeMap::from([("data".to_string(), "snapshot".to_string())]),
            ..Default::default()
        };
        let mut registry = Registry::new(defaults).expect("valid defaults");
        registry
            .register(
                "posts",
                HistoryOptions {
                    format: Some(DataFormat::Json),
                    fields: BTreeMap::from([("changed".to_string(), "delta".to_string())]),
                    ..Default::default()
                },
            )
            .expect("valid");

        let storage = registry.history_model("posts").expect("enabled");
        assert_eq!(storage.table, "audit");
        assert_eq!(storage.format, DataFormat::Json);
        assert_eq!(storage.fields.data, "snapshot");
        assert_eq!(storage.fields.changed, "delta");
        assert_eq!(storage.fields.sequence, "sequence");
    }

    #[test]
    fn malformed_field_maps_are_rejected() {
        let mut registry = Registry::default();
        let unknown = HistoryOptions {
            fields: BTreeMap::from([("colour".to_string(), "c".to_string())]),
            ..Default::default()
        };
        assert!(matches!(
            registry.register("a", unknown),
            Err(HistoryError::InvalidConfiguration(_))
        ));

        let duplicate = HistoryOptions {
            fields: BTreeMap::from([("changed".to_string(), "data".to_string())]),
            ..Default::default()
        };
        assert!(matches!(
            registry.register("b", duplicate),
            Err(HistoryError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn invalid_defaults_fail_fast() {
        assert!(Registry::new(hooks(&["removed"])).is_err());
    }

    #[test]
    fn history_model_is_none_when_disabled_or_unknown() {
        let mut registry = Registry::default();
        registry
            .register(
                "drafts",
                HistoryOptions {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .expect("valid");
        assert!(registry.history_model("drafts").is_none());
        assert!(registry.history_model("nobody").is_none());
        assert!(matches!(
            registry.tracked("drafts"),
            Err(HistoryError::Untracked(_))
        ));
    }

    #[test]
    fn config_file_tables_deserialize() {
        let options: HistoryOptions = toml::from_str(
            r#"
            storage = "history_json"
            format = "json"
            auto_history = ["updated"]
            [fields]
            resource_type = "kind"
            "#,
        )
        .expect("valid toml");
        assert_eq!(options.storage.as_deref(), Some("history_json"));
        assert_eq!(options.format, Some(DataFormat::Json));
        assert_eq!(
            options.auto_history,
            Some(AutoHistory::Hooks(vec!["updated".to_string()]))
        );

        let flag: HistoryOptions = toml::from_str("auto_history = false").expect("valid toml");
        assert_eq!(flag.auto_history, Some(AutoHistory::Enabled(false)));
    }
}
