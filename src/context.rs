//! The unit of work.
//!
//! A [`Context`] holds every uncommitted insert, update and delete. Reads
//! made through it see those changes layered over the committed store;
//! nothing is durable until [`Context::commit`] succeeds.
//!
//! # Invariants
//! - Mutations take the write lock; reads take the read lock, so a read
//!   never observes a half-applied mutation.
//! - A failed commit leaves the pending changes exactly as they were.
//! - Live queries are refreshed before `commit`/`rollback` return.

use crate::engine::EntityStore;
use crate::error::{Result, StoreError};
use crate::live::LiveRegistry;
use crate::query::FetchRequest;
use crate::types::{ManagedObject, ObjectId, StoredObject};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::warn;

/// Changes not yet committed.
#[derive(Clone, Debug, Default)]
pub struct PendingChanges {
    /// New objects, keyed by their pre-allocated id.
    pub(crate) inserted: BTreeMap<ObjectId, StoredObject>,
    /// Committed objects with new attribute values.
    pub(crate) updated: BTreeMap<ObjectId, StoredObject>,
    /// Committed objects marked for removal.
    pub(crate) deleted: BTreeSet<ObjectId>,
}

impl PendingChanges {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn inserted_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.inserted.keys().copied()
    }

    pub fn updated_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.updated.keys().copied()
    }

    pub fn deleted_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.deleted.iter().copied()
    }
}

/// What a successful commit wrote.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CommitSummary {
    /// Journal sequence of the commit; 0 for an empty commit.
    pub sequence: u64,
    pub inserted: Vec<ObjectId>,
    pub updated: Vec<ObjectId>,
    pub deleted: Vec<ObjectId>,
    /// Entities with at least one changed object.
    pub entities: BTreeSet<String>,
}

impl CommitSummary {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// The single shared unit of work.
pub struct Context {
    store: Arc<EntityStore>,
    pending: RwLock<PendingChanges>,
    live: LiveRegistry,
}

impl Context {
    pub(crate) fn new(store: Arc<EntityStore>) -> Self {
        Self {
            store,
            pending: RwLock::new(PendingChanges::default()),
            live: LiveRegistry::new(),
        }
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    pub(crate) fn live(&self) -> &LiveRegistry {
        &self.live
    }

    /// Read access to the pending changes.
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, PendingChanges> {
        self.pending.read()
    }

    fn write(&self) -> RwLockWriteGuard<'_, PendingChanges> {
        self.pending.write()
    }

    pub fn has_changes(&self) -> bool {
        !self.read().is_empty()
    }

    /// Number of live queries still following this context.
    pub fn live_query_count(&self) -> usize {
        self.live.count()
    }

    // --- Mutations ---

    /// Create a new object with the entity's defaults.
    pub fn insert(&self, entity: &str) -> Result<ManagedObject> {
        let descriptor = self.store.schema().entity(entity)?;
        let id = self.store.allocate_id();
        let attributes = descriptor.initial_attributes();

        self.write().inserted.insert(
            id,
            StoredObject {
                entity: descriptor.name.clone(),
                attributes: attributes.clone(),
            },
        );

        Ok(ManagedObject::new(id, descriptor.name.clone(), attributes))
    }

    /// Stage an object's attribute values.
    pub fn update(&self, object: &ManagedObject) -> Result<()> {
        let descriptor = self.store.schema().entity(object.entity())?;
        descriptor.check_attribute_names(object.attributes().keys().map(String::as_str))?;

        let mut pending = self.write();
        let id = object.id();

        if pending.deleted.contains(&id) {
            return Err(StoreError::ObjectNotFound(id));
        }

        if let Some(inserted) = pending.inserted.get_mut(&id) {
            if inserted.entity != object.entity() {
                return Err(StoreError::ObjectNotFound(id));
            }
            inserted.attributes.extend(object.attributes().clone());
            return Ok(());
        }

        let current = match pending.updated.get(&id) {
            Some(staged) => Some(staged.clone()),
            None => self
                .store
                .get(&PendingChanges::default(), id)
                .map(|committed| StoredObject {
                    entity: committed.entity().to_string(),
                    attributes: committed.attributes().clone(),
                }),
        };

        match current {
            Some(mut stored) if stored.entity == object.entity() => {
                stored.attributes.extend(object.attributes().clone());
                pending.updated.insert(id, stored);
                Ok(())
            }
            _ => Err(StoreError::ObjectNotFound(id)),
        }
    }

    /// Mark an object for removal. Unknown or already deleted ids are a no-op.
    pub fn delete(&self, id: ObjectId) {
        let mut pending = self.write();
        if pending.inserted.remove(&id).is_some() {
            return;
        }
        if self.store.is_committed(id) {
            pending.updated.remove(&id);
            pending.deleted.insert(id);
        }
    }

    /// Fetch-then-delete-each under one write lock. Returns how many were
    /// marked.
    pub fn delete_matching(&self, request: &FetchRequest) -> Result<usize> {
        let mut pending = self.write();
        let matches = self.store.execute(&pending, request)?;

        for object in &matches {
            let id = object.id();
            if pending.inserted.remove(&id).is_none() {
                pending.updated.remove(&id);
                pending.deleted.insert(id);
            }
        }

        Ok(matches.len())
    }

    // --- Reads ---

    pub fn fetch(&self, request: &FetchRequest) -> Result<Vec<ManagedObject>> {
        let pending = self.read();
        self.store.execute(&pending, request)
    }

    pub fn count(&self, request: &FetchRequest) -> Result<usize> {
        let pending = self.read();
        self.store.count(&pending, request)
    }

    pub fn get(&self, id: ObjectId) -> Option<ManagedObject> {
        let pending = self.read();
        self.store.get(&pending, id)
    }

    // --- Transactions ---

    /// Entities with at least one pending change.
    fn touched_entities(&self, pending: &PendingChanges) -> BTreeSet<String> {
        let mut entities: BTreeSet<String> = pending
            .inserted
            .values()
            .chain(pending.updated.values())
            .map(|object| object.entity.clone())
            .collect();
        entities.extend(
            pending
                .deleted
                .iter()
                .filter_map(|id| self.store.committed_entity(*id)),
        );
        entities
    }

    /// Persist all pending changes.
    ///
    /// With nothing pending this is a no-op returning an empty summary.
    pub fn commit(&self) -> Result<CommitSummary> {
        let mut pending = self.write();
        if pending.is_empty() {
            return Ok(CommitSummary::default());
        }

        let entities = self.touched_entities(&pending);

        let change_set = match self.store.save(&pending) {
            Ok(change_set) => change_set,
            Err(e) => {
                warn!(error = %e, "commit failed; pending changes kept");
                return Err(e);
            }
        };

        *pending = PendingChanges::default();

        let summary = CommitSummary {
            sequence: change_set.sequence,
            inserted: change_set.inserted.iter().map(|(id, _)| *id).collect(),
            updated: change_set.updated.iter().map(|(id, _)| *id).collect(),
            deleted: change_set.deleted.clone(),
            entities,
        };

        // Readers may proceed; writers wait until every live query is current.
        let pending = RwLockWriteGuard::downgrade(pending);
        self.live.refresh(&self.store, &pending, &summary.entities);

        Ok(summary)
    }

    /// Discard all pending changes.
    pub fn rollback(&self) {
        let mut pending = self.write();
        if pending.is_empty() {
            return;
        }

        let entities = self.touched_entities(&pending);

        *pending = PendingChanges::default();

        let pending = RwLockWriteGuard::downgrade(pending);
        self.live.refresh(&self.store, &pending, &entities);
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // `None` while a commit holds the pending changes.
        let has_changes = self.pending.try_read().map(|pending| !pending.is_empty());
        f.debug_struct("Context")
            .field("path", &self.store.path())
            .field("has_changes", &has_changes)
            .field("live_queries", &self.live_query_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::StoreConfig;
    use crate::query::{FetchOptions, QueryBuilder};
    use crate::schema::{AttributeDescriptor, AttributeKind, EntityDescriptor, Schema};
    use crate::types::Value;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> Context {
        let schema = Schema::new(vec![EntityDescriptor::new("Tag")
            .attribute(AttributeDescriptor::new("label", AttributeKind::Text))
            .unique("label")])
        .unwrap();
        let store = EntityStore::open(StoreConfig::at(dir.path()), Arc::new(schema)).unwrap();
        Context::new(Arc::new(store))
    }

    fn all_tags(context: &Context) -> FetchRequest {
        QueryBuilder::new(context.store().schema())
            .build("Tag", FetchOptions::all())
            .unwrap()
    }

    fn tag(context: &Context, label: &str) -> ManagedObject {
        let mut tag = context.insert("Tag").unwrap();
        tag.set("label", label);
        context.update(&tag).unwrap();
        tag
    }

    #[test]
    fn test_insert_defaults_to_null() {
        let dir = TempDir::new().unwrap();
        let context = context(&dir);

        let tag = context.insert("Tag").unwrap();
        assert_eq!(tag.get("label"), &Value::Null);
        assert!(context.has_changes());
        assert_eq!(context.read().inserted_ids().collect::<Vec<_>>(), vec![tag.id()]);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let context = context(&dir);

        let first = tag(&context, "a");
        context.commit().unwrap();

        context.delete(first.id());
        context.delete(first.id());
        assert_eq!(context.read().deleted_ids().count(), 1);
        assert!(context.get(first.id()).is_none());

        // Unknown ids are ignored.
        context.delete(ObjectId(999));
        assert_eq!(context.read().deleted_ids().count(), 1);
    }

    #[test]
    fn test_update_replaces_staged_values() {
        let dir = TempDir::new().unwrap();
        let context = context(&dir);

        let mut object = tag(&context, "draft");
        context.commit().unwrap();

        object.set("label", "one");
        context.update(&object).unwrap();
        object.set("label", "two");
        context.update(&object).unwrap();

        assert_eq!(context.read().updated_ids().count(), 1);
        let seen = context.get(object.id()).unwrap();
        assert_eq!(seen.get("label"), &Value::from("two"));
    }

    #[test]
    fn test_update_unknown_object() {
        let dir = TempDir::new().unwrap();
        let context = context(&dir);

        let stray = ManagedObject::new(ObjectId(42), "Tag", Default::default());
        assert!(matches!(
            context.update(&stray),
            Err(StoreError::ObjectNotFound(ObjectId(42)))
        ));
    }

    #[test]
    fn test_delete_matching_counts_pending_and_committed() {
        let dir = TempDir::new().unwrap();
        let context = context(&dir);

        tag(&context, "a");
        context.commit().unwrap();
        tag(&context, "b");

        let removed = context.delete_matching(&all_tags(&context)).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(context.read().inserted_ids().count(), 0);
        assert_eq!(context.count(&all_tags(&context)).unwrap(), 0);
    }

    #[test]
    fn test_failed_commit_keeps_pending() {
        let dir = TempDir::new().unwrap();
        let context = context(&dir);

        tag(&context, "same");
        tag(&context, "same");
        let before = context.read().clone();

        assert!(context.commit().is_err());
        let after = context.read();
        assert_eq!(after.inserted, before.inserted);
        assert_eq!(context.store().stats().last_sequence, 0);
    }

    #[test]
    fn test_commit_summary() {
        let dir = TempDir::new().unwrap();
        let context = context(&dir);

        let a = tag(&context, "a");
        let summary = context.commit().unwrap();
        assert_eq!(summary.sequence, 1);
        assert_eq!(summary.inserted, vec![a.id()]);
        assert!(summary.entities.contains("Tag"));
        assert!(!context.has_changes());

        context.delete(a.id());
        let summary = context.commit().unwrap();
        assert_eq!(summary.deleted, vec![a.id()]);
        assert_eq!(summary.entities.len(), 1);
    }

    #[test]
    fn test_rollback_discards_everything() {
        let dir = TempDir::new().unwrap();
        let context = context(&dir);

        let a = tag(&context, "a");
        context.commit().unwrap();

        tag(&context, "b");
        context.delete(a.id());
        context.rollback();

        assert!(!context.has_changes());
        let labels: Vec<_> = context
            .fetch(&all_tags(&context))
            .unwrap()
            .iter()
            .map(|t| t.get("label").to_string())
            .collect();
        assert_eq!(labels, vec!["a"]);
    }

    #[test]
    fn test_debug_output() {
        let dir = TempDir::new().unwrap();
        let context = context(&dir);
        context.insert("Tag").unwrap();

        let output = format!("{:?}", context);
        assert!(output.starts_with("Context"));
        assert!(output.contains("has_changes: Some(true)"));
        assert!(output.contains("live_queries: 0"));
    }
}
