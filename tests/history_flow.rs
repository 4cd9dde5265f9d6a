use std::sync::Arc;

use serde_json::{json, Value};

use revisionist::domain::{Attributes, Author, Operation, Resource, ResourceId};
use revisionist::history::{
    AutoHistory, Change, DataFormat, History, HistoryError, HistoryOptions, MutationOptions,
    Registry,
};
use revisionist::repo::Repository;
use revisionist::store::{Datastore, KeyKind, MemoryStore, TableSpec, Transaction};

fn attrs(value: Value) -> Attributes {
    match value {
        Value::Object(map) => map,
        _ => panic!("attributes are objects"),
    }
}

fn repository(registry: Registry) -> Repository {
    let mut store = MemoryStore::new()
        .with_table("test", TableSpec::new().key("id", KeyKind::Serial))
        .with_table("drafts", TableSpec::new().key("id", KeyKind::Serial));
    for storage in registry.storages() {
        store = store.with_table(storage.table.clone(), storage.table_spec());
    }
    Repository::new(History::new(Arc::new(store), registry))
}

fn tracked(options: HistoryOptions) -> Repository {
    let mut registry = Registry::default();
    registry.register("test", options).expect("valid");
    repository(registry)
}

async fn create(repo: &Repository) -> Resource {
    repo.create(
        "test",
        attrs(json!({"name": "John Doe", "email": "j@x.com"})),
        MutationOptions::default(),
    )
    .await
    .expect("create")
}

fn id_of(resource: &Resource) -> ResourceId {
    resource.id("id").expect("saved resources have an id")
}

#[tokio::test]
async fn create_update_revert_round_trip() {
    let repo = tracked(HistoryOptions::default());
    let history = repo.history();

    let john = create(&repo).await;
    let id = id_of(&john);
    repo.update(
        "test",
        &id,
        attrs(json!({"name": "Jonny"})),
        MutationOptions::default(),
    )
    .await
    .expect("update");

    let entries = history.entries("test", &id, None).await.expect("entries");
    assert_eq!(entries.len(), 2);

    assert_eq!(entries[0].sequence, 1);
    assert_eq!(entries[0].operation, Operation::Created);
    assert_eq!(entries[0].data["name"], json!("John Doe"));
    assert_eq!(entries[0].changed, None);

    assert_eq!(entries[1].sequence, 2);
    assert_eq!(entries[1].operation, Operation::Updated);
    assert!(!entries[1].patch);
    assert_eq!(entries[1].data["name"], json!("Jonny"));
    let changed = entries[1].changed.as_ref().expect("diff recorded");
    assert_eq!(changed.len(), 1);
    assert_eq!(
        changed.get("name"),
        Some(&Change::Modified {
            old: json!("John Doe"),
            new: json!("Jonny")
        })
    );

    let affected = history.revert("test", &id, Some(1), None).await.expect("revert");
    assert_eq!(affected, 1);

    let live = repo
        .fetch("test", &id, None)
        .await
        .expect("fetch")
        .expect("still exists");
    assert_eq!(live.attributes, entries[0].data);
    assert_eq!(live.get("name"), Some(&json!("John Doe")));

    let entries = history.entries("test", &id, None).await.expect("entries");
    assert_eq!(entries.len(), 2);
}

#[tokio::test]
async fn sequences_are_gap_free_in_mutation_order() {
    let repo = tracked(HistoryOptions::default());
    let resource = create(&repo).await;
    let id = id_of(&resource);

    for n in 0..9 {
        repo.update(
            "test",
            &id,
            attrs(json!({"counter": n})),
            MutationOptions::default(),
        )
        .await
        .expect("update");
    }

    let entries = repo.history().entries("test", &id, None).await.expect("entries");
    let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, (1..=10).collect::<Vec<_>>());
    assert_eq!(entries[9].data["counter"], json!(8));
}

#[tokio::test]
async fn concurrent_writers_never_share_a_sequence() {
    let repo = Arc::new(tracked(HistoryOptions::default()));
    let resource = create(&repo).await;
    let id = id_of(&resource);

    let writers = (0..8).map(|n| {
        let repo = repo.clone();
        let id = id.clone();
        tokio::spawn(async move {
            repo.update(
                "test",
                &id,
                attrs(json!({"writer": n})),
                MutationOptions::default(),
            )
            .await
        })
    });
    for outcome in futures::future::join_all(writers).await {
        outcome.expect("task completes").expect("update");
    }

    let entries = repo.history().entries("test", &id, None).await.expect("entries");
    let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, (1..=9).collect::<Vec<_>>());
}

#[tokio::test]
async fn patch_saves_are_flagged() {
    let repo = tracked(HistoryOptions::default());
    let resource = create(&repo).await;
    let id = id_of(&resource);

    repo.update(
        "test",
        &id,
        attrs(json!({"name": "Jonny"})),
        MutationOptions::default().patch(true),
    )
    .await
    .expect("update");

    let entries = repo.history().entries("test", &id, None).await.expect("entries");
    assert!(!entries[0].patch);
    assert!(entries[1].patch);
    assert_eq!(entries[1].data["name"], json!("Jonny"));
}

#[tokio::test]
async fn opted_out_saves_still_apply() {
    let repo = tracked(HistoryOptions::default());
    let resource = create(&repo).await;
    let id = id_of(&resource);

    let updated = repo
        .update(
            "test",
            &id,
            attrs(json!({"name": "changed"})),
            MutationOptions::without_history(),
        )
        .await
        .expect("update");
    assert_eq!(updated.get("name"), Some(&json!("changed")));

    let entries = repo.history().entries("test", &id, None).await.expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].operation, Operation::Created);

    let live = repo.fetch("test", &id, None).await.expect("fetch").expect("exists");
    assert_eq!(live.get("name"), Some(&json!("changed")));
}

#[tokio::test]
async fn revert_without_sequence_skips_unrecorded_changes() {
    let repo = tracked(HistoryOptions::default());
    let resource = create(&repo).await;
    let id = id_of(&resource);

    repo.update("test", &id, attrs(json!({"name": "changed"})), MutationOptions::default())
        .await
        .expect("update");
    repo.update(
        "test",
        &id,
        attrs(json!({"name": "changed2"})),
        MutationOptions::without_history(),
    )
    .await
    .expect("update");

    repo.history().revert("test", &id, None, None).await.expect("revert");

    let live = repo.fetch("test", &id, None).await.expect("fetch").expect("exists");
    assert_eq!(live.get("name"), Some(&json!("changed")));
    let entries = repo.history().entries("test", &id, None).await.expect("entries");
    assert_eq!(entries.len(), 2);
}

#[tokio::test]
async fn backup_records_a_manual_snapshot() {
    let repo = tracked(HistoryOptions {
        auto_history: Some(AutoHistory::Enabled(false)),
        ..Default::default()
    });
    let resource = create(&repo).await;
    let id = id_of(&resource);

    assert!(repo
        .history()
        .entries("test", &id, None)
        .await
        .expect("entries")
        .is_empty());

    let entry = repo.history().backup("test", &id, None).await.expect("backup");
    assert_eq!(entry.operation, Operation::Manual);
    assert_eq!(entry.sequence, 1);
    assert!(!entry.patch);
    assert_eq!(entry.data, resource.attributes);
}

#[tokio::test]
async fn operations_join_a_running_transaction() {
    let repo = tracked(HistoryOptions::default());
    let history = repo.history();
    let store = history.store().clone();

    let mut tx = store.begin().await.expect("begin");
    let resource = repo
        .create(
            "test",
            attrs(json!({"name": "John Doe"})),
            MutationOptions::default().transacting(tx.as_mut()),
        )
        .await
        .expect("create");
    let id = id_of(&resource);
    repo.update(
        "test",
        &id,
        attrs(json!({"name": "changed"})),
        MutationOptions::default().transacting(tx.as_mut()),
    )
    .await
    .expect("update");
    history
        .backup("test", &id, Some(tx.as_mut()))
        .await
        .expect("backup");
    history
        .revert("test", &id, Some(1), Some(tx.as_mut()))
        .await
        .expect("revert");

    let entries = history
        .entries("test", &id, Some(tx.as_mut()))
        .await
        .expect("entries");
    let operations: Vec<Operation> = entries.iter().map(|e| e.operation).collect();
    assert_eq!(
        operations,
        [Operation::Created, Operation::Updated, Operation::Manual]
    );
    let live = repo
        .fetch("test", &id, Some(tx.as_mut()))
        .await
        .expect("fetch")
        .expect("exists");
    assert_eq!(live.get("name"), Some(&json!("John Doe")));
    tx.commit().await.expect("commit");

    let entries = history.entries("test", &id, None).await.expect("entries");
    assert_eq!(entries.len(), 3);
}

#[tokio::test]
async fn failed_record_rolls_back_the_owned_transaction() {
    let repo = tracked(HistoryOptions {
        id_attribute: Some("uuid".into()),
        ..Default::default()
    });

    // The serial key fills `id`, so the tracked `uuid` identity is missing.
    let err = repo
        .create("test", attrs(json!({"name": "x"})), MutationOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, HistoryError::InvalidResource(_)));

    let store = repo.history().store().clone();
    let mut tx = store.begin().await.expect("begin");
    let rows = tx
        .find_all("test", &Attributes::new(), None)
        .await
        .expect("select");
    assert!(rows.is_empty(), "resource insert was rolled back with the history write");
}

#[tokio::test]
async fn native_json_storage_round_trips() {
    let repo = tracked(HistoryOptions {
        storage: Some("history_json".into()),
        format: Some(DataFormat::Json),
        ..Default::default()
    });
    assert_eq!(
        repo.history().history_model("test").map(|s| s.table.as_str()),
        Some("history_json")
    );

    let resource = create(&repo).await;
    let id = id_of(&resource);
    repo.update("test", &id, attrs(json!({"name": "changed"})), MutationOptions::default())
        .await
        .expect("update");
    repo.history()
        .revert("test", &id, Some(1), None)
        .await
        .expect("revert");

    let live = repo.fetch("test", &id, None).await.expect("fetch").expect("exists");
    assert_eq!(live.get("name"), Some(&json!("John Doe")));
}

#[tokio::test]
async fn disabled_types_write_no_history() {
    let mut registry = Registry::default();
    registry.register("test", HistoryOptions::default()).expect("valid");
    registry.disable("drafts");
    let repo = repository(registry);

    let draft = repo
        .create("drafts", attrs(json!({"name": "x"})), MutationOptions::default())
        .await
        .expect("create");
    assert!(repo.history().history_model("drafts").is_none());

    let err = repo
        .history()
        .entries("drafts", &id_of(&draft), None)
        .await
        .unwrap_err();
    assert!(matches!(err, HistoryError::Untracked(_)));
}

#[tokio::test]
async fn author_callback_is_attached() {
    let mut registry = Registry::default();
    registry
        .register_with_author(
            "test",
            HistoryOptions::default(),
            Some(Arc::new(|resource: &Resource| {
                resource.get("email").map(|email| Author {
                    id: email.clone(),
                    source: "email".into(),
                })
            })),
        )
        .expect("valid");
    let repo = repository(registry);

    let resource = create(&repo).await;
    let entries = repo
        .history()
        .entries("test", &id_of(&resource), None)
        .await
        .expect("entries");
    assert_eq!(
        entries[0].author,
        Some(Author {
            id: json!("j@x.com"),
            source: "email".into()
        })
    );
}
