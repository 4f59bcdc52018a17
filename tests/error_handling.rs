//! Error handling and edge case tests.

use entity_access::{
    AttributeDescriptor, AttributeKind, DataAccess, EntityDescriptor, FetchOptions,
    PersistenceError, Predicate, Schema, StoreConfig, StoreError,
};
use tempfile::TempDir;

fn schema() -> Schema {
    Schema::new(vec![
        EntityDescriptor::new("Task")
            .attribute(AttributeDescriptor::new("title", AttributeKind::Text))
            .attribute(AttributeDescriptor::new("done", AttributeKind::Bool).with_default(false)),
        EntityDescriptor::new("Tag")
            .attribute(AttributeDescriptor::new("label", AttributeKind::Text))
            .unique("label"),
    ])
    .unwrap()
}

fn test_access(dir: &TempDir) -> DataAccess {
    DataAccess::open(schema(), StoreConfig::at(dir.path().join("store"))).unwrap()
}

fn is_unknown_entity<T: std::fmt::Debug>(result: Result<T, StoreError>) -> bool {
    matches!(result, Err(StoreError::UnknownEntity(ref name)) if name == "Ghost")
}

// --- Unknown Entities ---

#[test]
fn test_unknown_entity_everywhere() {
    let dir = TempDir::new().unwrap();
    let access = test_access(&dir);

    assert!(is_unknown_entity(access.insert("Ghost")));
    assert!(is_unknown_entity(access.select_many("Ghost", FetchOptions::all())));
    assert!(is_unknown_entity(access.select_one("Ghost", FetchOptions::all())));
    assert!(is_unknown_entity(access.count("Ghost", None)));
    assert!(is_unknown_entity(access.delete_all("Ghost", None)));
    assert!(is_unknown_entity(access.live_query("Ghost", FetchOptions::all(), None)));
}

#[test]
fn test_unknown_entity_before_configuration() {
    let access = DataAccess::new(schema());
    assert!(is_unknown_entity(access.insert("Ghost")));
    assert!(is_unknown_entity(access.count("Ghost", None)));
}

// --- Configuration ---

#[test]
fn test_unconfigured_facade() {
    let access = DataAccess::new(schema());

    let err = access.select_many("Task", FetchOptions::all()).unwrap_err();
    assert!(matches!(err, StoreError::Configuration(_)));
    assert!(access.insert("Task").unwrap_err().is_configuration());
    assert!(access.commit().unwrap_err().is_configuration());

    // Rollback never fails.
    access.rollback();
    assert!(!access.has_changes());
}

#[test]
fn test_init_store_twice() {
    let dir = TempDir::new().unwrap();
    let access = DataAccess::new(schema());

    access
        .init_store(StoreConfig::at(dir.path().join("store")))
        .unwrap();
    let err = access
        .init_store(StoreConfig::at(dir.path().join("other")))
        .unwrap_err();
    assert!(matches!(err, StoreError::Configuration(_)));
}

#[test]
fn test_missing_store_without_create() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig {
        create_if_missing: false,
        ..StoreConfig::at(dir.path().join("absent"))
    };

    let err = DataAccess::open(schema(), config).unwrap_err();
    assert!(matches!(err, StoreError::Configuration(_)));
}

#[test]
fn test_store_locked() {
    let dir = TempDir::new().unwrap();
    let _first = test_access(&dir);

    let second = DataAccess::open(schema(), StoreConfig::at(dir.path().join("store")));
    assert!(matches!(second, Err(StoreError::Locked)));
}

#[test]
fn test_schema_mismatch_on_reopen() {
    let dir = TempDir::new().unwrap();
    drop(test_access(&dir));

    let changed = Schema::new(vec![EntityDescriptor::new("Task")
        .attribute(AttributeDescriptor::new("title", AttributeKind::Text))])
    .unwrap();

    let err = DataAccess::open(changed, StoreConfig::at(dir.path().join("store"))).unwrap_err();
    assert!(matches!(err, StoreError::Configuration(_)));
}

#[test]
fn test_invalid_schema() {
    let duplicate = Schema::new(vec![
        EntityDescriptor::new("Task"),
        EntityDescriptor::new("Task"),
    ]);
    assert!(matches!(duplicate, Err(StoreError::Configuration(_))));
}

// --- Invalid Queries ---

#[test]
fn test_conflicting_orderings() {
    let dir = TempDir::new().unwrap();
    let access = test_access(&dir);

    let options = FetchOptions::ordered("title", true)
        .sort_by(vec![entity_access::SortDescriptor::ascending("done")]);
    let err = access.select_many("Task", options).unwrap_err();
    assert!(matches!(err, StoreError::InvalidQuery(_)));
}

#[test]
fn test_unknown_attributes() {
    let dir = TempDir::new().unwrap();
    let access = test_access(&dir);

    let sort = access.select_many("Task", FetchOptions::ordered("colour", true));
    assert!(matches!(sort, Err(StoreError::InvalidQuery(_))));

    let filter = access.count("Task", Some(Predicate::eq("colour", "red")));
    assert!(matches!(filter, Err(StoreError::InvalidQuery(_))));

    let section = access.live_query("Task", FetchOptions::all(), Some("colour"));
    assert!(matches!(section, Err(StoreError::InvalidQuery(_))));

    let mut task = access.insert("Task").unwrap();
    task.set("colour", "red");
    assert!(matches!(access.update(&task), Err(StoreError::InvalidQuery(_))));
}

// --- Objects ---

#[test]
fn test_update_deleted_object() {
    let dir = TempDir::new().unwrap();
    let access = test_access(&dir);

    let mut task = access.insert("Task").unwrap();
    task.set("title", "gone");
    access.update(&task).unwrap();
    access.commit().unwrap();

    access.delete(&task).unwrap();
    let err = access.update(&task).unwrap_err();
    assert!(matches!(err, StoreError::ObjectNotFound(id) if id == task.id()));
}

#[test]
fn test_zero_matches_are_not_errors() {
    let dir = TempDir::new().unwrap();
    let access = test_access(&dir);

    assert!(access.select_many("Task", FetchOptions::all()).unwrap().is_empty());
    assert!(access.select_one("Task", FetchOptions::all()).unwrap().is_none());
    assert_eq!(access.count("Task", None).unwrap(), 0);
    assert_eq!(access.delete_all("Task", None).unwrap(), 0);
}

// --- Constraints ---

#[test]
fn test_required_attribute_keeps_pending() {
    let dir = TempDir::new().unwrap();
    let access = test_access(&dir);

    let task = access.insert("Task").unwrap();
    let err = access.commit().unwrap_err();
    assert!(matches!(
        err,
        StoreError::Persistence(PersistenceError::Constraint(_))
    ));
    assert!(err.is_recoverable());

    // Still pending; fix it and retry.
    assert!(access.has_changes());
    let mut task = task;
    task.set("title", "fixed");
    access.update(&task).unwrap();
    access.commit().unwrap();
    assert_eq!(access.count("Task", None).unwrap(), 1);
}

#[test]
fn test_wrong_kind_rejected() {
    let dir = TempDir::new().unwrap();
    let access = test_access(&dir);

    let mut task = access.insert("Task").unwrap();
    task.set("title", 42i64);
    access.update(&task).unwrap();

    assert!(matches!(
        access.commit(),
        Err(StoreError::Persistence(PersistenceError::Constraint(_)))
    ));
}

#[test]
fn test_unique_violation_then_rollback() {
    let dir = TempDir::new().unwrap();
    let access = test_access(&dir);

    for _ in 0..2 {
        let mut tag = access.insert("Tag").unwrap();
        tag.set("label", "urgent");
        access.update(&tag).unwrap();
    }

    assert!(matches!(
        access.commit(),
        Err(StoreError::Persistence(PersistenceError::Constraint(_)))
    ));
    assert_eq!(access.count("Tag", None).unwrap(), 2);

    access.rollback();
    assert_eq!(access.count("Tag", None).unwrap(), 0);
    assert_eq!(access.stats().unwrap().last_sequence, 0);
}
