//! The entity store: committed objects on disk and in memory.

use super::journal::{ChangeSet, Journal};
use super::snapshot::Snapshot;
use crate::context::PendingChanges;
use crate::error::{Result, StoreError};
use crate::query::FetchRequest;
use crate::schema::Schema;
use crate::types::{ManagedObject, ObjectId, StoredObject, Timestamp};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Directory holding the store files.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Rewrite the snapshot and truncate the journal after this many
    /// commits (0 = never).
    pub checkpoint_interval: u64,

    /// Trace every fetch request at debug level.
    pub logging_enabled: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./store"),
            create_if_missing: true,
            checkpoint_interval: 256,
            logging_enabled: false,
        }
    }
}

impl StoreConfig {
    /// Default configuration rooted at `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

/// Store statistics.
#[derive(Clone, Debug, Default)]
pub struct StoreStats {
    pub object_count: u64,
    pub entity_counts: BTreeMap<String, u64>,
    pub journal_entries: u64,
    pub journal_bytes: u64,
    pub last_sequence: u64,
}

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"EAS\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

const SNAPSHOT_FILE: &str = "objects.bin";
const JOURNAL_FILE: &str = "journal.log";

/// Committed objects indexed by entity.
#[derive(Default)]
struct Tables {
    objects: BTreeMap<ObjectId, StoredObject>,
    by_entity: HashMap<String, BTreeSet<ObjectId>>,
    last_sequence: u64,
}

impl Tables {
    fn insert(&mut self, id: ObjectId, object: StoredObject) {
        // Updates keep the entity, so the index entry is stable per id.
        self.by_entity
            .entry(object.entity.clone())
            .or_default()
            .insert(id);
        self.objects.insert(id, object);
    }

    fn remove(&mut self, id: ObjectId) {
        if let Some(object) = self.objects.remove(&id) {
            if let Some(ids) = self.by_entity.get_mut(&object.entity) {
                ids.remove(&id);
            }
        }
    }

    /// Apply a change set. Re-applying an already folded one is harmless.
    fn apply(&mut self, change_set: &ChangeSet) {
        for (id, object) in change_set.inserted.iter().chain(change_set.updated.iter()) {
            self.insert(*id, object.clone());
        }
        for id in &change_set.deleted {
            self.remove(*id);
        }
        self.last_sequence = self.last_sequence.max(change_set.sequence);
    }
}

/// The managed persistence engine behind the access facade.
///
/// Committed state lives in memory and is made durable by a journal of
/// change sets plus a periodic snapshot. Reads take a unit of work's pending
/// changes as an overlay, so uncommitted inserts, updates and deletes are
/// visible to the context that made them.
pub struct EntityStore {
    /// Store configuration.
    config: StoreConfig,

    /// Schema the store was opened with.
    schema: Arc<Schema>,

    /// Lock file for exclusive access.
    _lock_file: File,

    /// Committed objects.
    tables: RwLock<Tables>,

    /// Commit journal.
    journal: Journal,

    /// Next object id to hand out.
    next_id: AtomicU64,

    /// Serializes save and checkpoint.
    write_lock: Mutex<()>,
}

impl EntityStore {
    /// Open an existing store or create a new one.
    pub fn open(config: StoreConfig, schema: Arc<Schema>) -> Result<Self> {
        let manifest = config.path.join("MANIFEST");
        if manifest.exists() {
            Self::verify_manifest(&config.path, &schema)?;
        } else if config.create_if_missing {
            fs::create_dir_all(&config.path).map_err(|e| {
                StoreError::Configuration(format!(
                    "cannot create store at {}: {}",
                    config.path.display(),
                    e
                ))
            })?;
            Self::write_manifest(&config.path, &schema)?;
        } else {
            return Err(StoreError::Configuration(format!(
                "no store at {}",
                config.path.display()
            )));
        }

        let lock_file = Self::acquire_lock(&config.path)?;

        let snapshot = Snapshot::load(&config.path.join(SNAPSHOT_FILE))?;
        let (journal, entries) = Journal::open(config.path.join(JOURNAL_FILE))?;

        let mut tables = Tables {
            last_sequence: snapshot.last_sequence,
            ..Default::default()
        };
        let mut next_id = snapshot.next_id.max(1);
        for (id, object) in snapshot.objects {
            next_id = next_id.max(id.0 + 1);
            tables.insert(id, object);
        }

        let mut replayed = 0usize;
        for entry in &entries {
            if entry.sequence <= snapshot.last_sequence {
                continue;
            }
            tables.apply(entry);
            next_id = next_id.max(entry.next_id);
            replayed += 1;
        }

        for object in tables.objects.values() {
            if !schema.contains(&object.entity) {
                return Err(StoreError::Configuration(format!(
                    "store holds objects of undeclared entity {}",
                    object.entity
                )));
            }
        }

        info!(
            path = %config.path.display(),
            objects = tables.objects.len(),
            replayed,
            last_sequence = tables.last_sequence,
            "entity store opened"
        );

        Ok(Self {
            config,
            schema,
            _lock_file: lock_file,
            tables: RwLock::new(tables),
            journal,
            next_id: AtomicU64::new(next_id),
            write_lock: Mutex::new(()),
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Get the store path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Reserve a fresh object id. Ids are never reused, even after rollback.
    pub fn allocate_id(&self) -> ObjectId {
        ObjectId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    // --- Reads ---

    /// Look up one object through a unit of work's pending changes.
    pub fn get(&self, pending: &PendingChanges, id: ObjectId) -> Option<ManagedObject> {
        if pending.deleted.contains(&id) {
            return None;
        }
        if let Some(object) = pending.updated.get(&id).or_else(|| pending.inserted.get(&id)) {
            return Some(ManagedObject::from_stored(id, object));
        }
        let tables = self.tables.read();
        tables
            .objects
            .get(&id)
            .map(|object| ManagedObject::from_stored(id, object))
    }

    /// Whether `id` names a committed object.
    pub fn is_committed(&self, id: ObjectId) -> bool {
        self.tables.read().objects.contains_key(&id)
    }

    /// Evaluate a request: filter, then order, then limit.
    ///
    /// Without an ordering results come back in object-id order, which is an
    /// implementation detail rather than a guarantee.
    pub fn execute(
        &self,
        pending: &PendingChanges,
        request: &FetchRequest,
    ) -> Result<Vec<ManagedObject>> {
        self.check_request(request)?;
        if request.limit == Some(0) {
            return Ok(Vec::new());
        }

        let tables = self.tables.read();
        let mut matches: Vec<(ObjectId, &StoredObject)> = Vec::new();
        Self::scan(&tables, pending, &request.entity, |id, object| {
            if request.matches(&object.attributes) {
                matches.push((id, object));
            }
        });

        if !request.ordering.is_empty() {
            matches.sort_by(|(_, a), (_, b)| request.compare(&a.attributes, &b.attributes));
        }
        if let Some(limit) = request.limit {
            matches.truncate(limit);
        }

        Ok(matches
            .into_iter()
            .map(|(id, object)| ManagedObject::from_stored(id, object))
            .collect())
    }

    /// Count matches without materializing objects.
    pub fn count(&self, pending: &PendingChanges, request: &FetchRequest) -> Result<usize> {
        self.check_request(request)?;

        let tables = self.tables.read();
        let mut count = 0usize;
        Self::scan(&tables, pending, &request.entity, |_, object| {
            if request.matches(&object.attributes) {
                count += 1;
            }
        });

        Ok(request.limit.map_or(count, |limit| count.min(limit)))
    }

    /// Visit every live object of an entity as seen through `pending`, in id
    /// order.
    fn scan<'a>(
        tables: &'a Tables,
        pending: &'a PendingChanges,
        entity: &str,
        mut visit: impl FnMut(ObjectId, &'a StoredObject),
    ) {
        let mut ids: Vec<ObjectId> = tables
            .by_entity
            .get(entity)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        ids.extend(
            pending
                .inserted
                .iter()
                .filter(|(_, object)| object.entity == entity)
                .map(|(id, _)| *id),
        );
        ids.sort_unstable();
        ids.dedup();

        for id in ids {
            if pending.deleted.contains(&id) {
                continue;
            }
            let object = pending
                .updated
                .get(&id)
                .or_else(|| pending.inserted.get(&id))
                .or_else(|| tables.objects.get(&id));
            if let Some(object) = object {
                visit(id, object);
            }
        }
    }

    /// Reject predicates that name attributes the entity doesn't declare.
    fn check_request(&self, request: &FetchRequest) -> Result<()> {
        let descriptor = self.schema.entity(&request.entity)?;
        if let Some(ref predicate) = request.predicate {
            descriptor.check_attribute_names(predicate.attributes())?;
        }
        Ok(())
    }

    // --- Writes ---

    /// Validate and durably apply a unit of work's pending changes.
    ///
    /// Nothing in memory changes unless the journal append succeeded; on
    /// error `pending` is untouched and the caller may retry or discard.
    pub fn save(&self, pending: &PendingChanges) -> Result<ChangeSet> {
        let _lock = self.write_lock.lock();

        if pending.is_empty() {
            return Ok(ChangeSet::default());
        }

        self.validate(pending)?;

        let (sequence, deleted) = {
            let tables = self.tables.read();
            let deleted: Vec<ObjectId> = pending
                .deleted
                .iter()
                .copied()
                .filter(|id| tables.objects.contains_key(id))
                .collect();
            (tables.last_sequence + 1, deleted)
        };

        let change_set = ChangeSet {
            sequence,
            inserted: pending
                .inserted
                .iter()
                .map(|(id, object)| (*id, object.clone()))
                .collect(),
            updated: pending
                .updated
                .iter()
                .map(|(id, object)| (*id, object.clone()))
                .collect(),
            deleted,
            next_id: self.next_id.load(Ordering::SeqCst),
            timestamp: Timestamp::now(),
        };

        self.journal.append(&change_set)?;
        self.tables.write().apply(&change_set);

        if self.config.checkpoint_interval > 0
            && self.journal.entry_count() >= self.config.checkpoint_interval
        {
            // The commit is already durable in the journal.
            if let Err(e) = self.checkpoint_locked() {
                warn!(error = %e, "checkpoint failed; journal retained");
            }
        }

        Ok(change_set)
    }

    /// Entity name of a committed object.
    pub fn committed_entity(&self, id: ObjectId) -> Option<String> {
        self.tables
            .read()
            .objects
            .get(&id)
            .map(|object| object.entity.clone())
    }

    /// Check required attributes, kinds and unique constraints.
    fn validate(&self, pending: &PendingChanges) -> Result<()> {
        let mut touched: BTreeSet<&str> = BTreeSet::new();

        for object in pending.inserted.values().chain(pending.updated.values()) {
            let descriptor = self.schema.entity(&object.entity)?;
            descriptor.validate(&object.attributes)?;
            if !descriptor.unique.is_empty() {
                touched.insert(&object.entity);
            }
        }

        let tables = self.tables.read();
        for entity in touched {
            let descriptor = self.schema.entity(entity)?;
            for attribute in &descriptor.unique {
                let mut seen: Vec<(&crate::types::Value, ObjectId)> = Vec::new();
                let mut duplicate = None;
                Self::scan(&tables, pending, entity, |id, object| {
                    if duplicate.is_some() {
                        return;
                    }
                    let value = match object.attributes.get(attribute) {
                        Some(v) if !v.is_null() => v,
                        _ => return,
                    };
                    if let Some((_, other)) = seen.iter().find(|(v, _)| v.loosely_eq(value)) {
                        duplicate = Some((*other, id, value.clone()));
                    } else {
                        seen.push((value, id));
                    }
                });
                if let Some((first, second, value)) = duplicate {
                    return Err(StoreError::constraint(format!(
                        "{}.{} must be unique: {} and {} both have {:?}",
                        entity, attribute, first, second, value
                    )));
                }
            }
        }

        Ok(())
    }

    /// Fold the journal into a fresh snapshot.
    pub fn checkpoint(&self) -> Result<()> {
        let _lock = self.write_lock.lock();
        self.checkpoint_locked()
    }

    fn checkpoint_locked(&self) -> Result<()> {
        let snapshot = {
            let tables = self.tables.read();
            Snapshot {
                last_sequence: tables.last_sequence,
                next_id: self.next_id.load(Ordering::SeqCst),
                objects: tables
                    .objects
                    .iter()
                    .map(|(id, object)| (*id, object.clone()))
                    .collect(),
            }
        };

        snapshot.save(&self.config.path.join(SNAPSHOT_FILE))?;
        self.journal.reset()?;

        info!(
            path = %self.config.path.display(),
            objects = snapshot.objects.len(),
            last_sequence = snapshot.last_sequence,
            "checkpoint written"
        );
        Ok(())
    }

    /// Get store statistics.
    pub fn stats(&self) -> StoreStats {
        let tables = self.tables.read();
        StoreStats {
            object_count: tables.objects.len() as u64,
            entity_counts: tables
                .by_entity
                .iter()
                .filter(|(_, ids)| !ids.is_empty())
                .map(|(name, ids)| (name.clone(), ids.len() as u64))
                .collect(),
            journal_entries: self.journal.entry_count(),
            journal_bytes: self.journal.size(),
            last_sequence: tables.last_sequence,
        }
    }

    // --- Private Helpers ---

    fn write_manifest(path: &Path, schema: &Schema) -> Result<()> {
        use std::io::Write;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::create(manifest_path)?;

        let fingerprint = schema.fingerprint().as_bytes();
        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.write_all(&(fingerprint.len() as u16).to_le_bytes())?;
        file.write_all(fingerprint)?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path, schema: &Schema) -> Result<()> {
        use std::io::Read;

        let bad = |what: &str| {
            StoreError::Configuration(format!("{} in {}", what, path.join("MANIFEST").display()))
        };

        let mut file = File::open(path.join("MANIFEST")).map_err(|_| bad("unreadable manifest"))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic).map_err(|_| bad("truncated manifest"))?;
        if &magic != STORE_MAGIC {
            return Err(bad("invalid store magic"));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version).map_err(|_| bad("truncated manifest"))?;
        if version[0] != STORE_VERSION {
            return Err(bad(&format!("unsupported store version {}", version[0])));
        }

        let mut len_bytes = [0u8; 2];
        file.read_exact(&mut len_bytes).map_err(|_| bad("truncated manifest"))?;
        let mut fingerprint = vec![0u8; u16::from_le_bytes(len_bytes) as usize];
        file.read_exact(&mut fingerprint).map_err(|_| bad("truncated manifest"))?;

        if fingerprint != schema.fingerprint().as_bytes() {
            return Err(StoreError::Configuration(format!(
                "schema fingerprint mismatch at {}: store was created with {}",
                path.display(),
                String::from_utf8_lossy(&fingerprint)
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PersistenceError;
    use crate::predicate::Predicate;
    use crate::query::{FetchOptions, QueryBuilder};
    use crate::schema::{AttributeDescriptor, AttributeKind, EntityDescriptor};
    use crate::types::{Attributes, Value};
    use tempfile::TempDir;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new(vec![
                EntityDescriptor::new("Tag")
                    .attribute(AttributeDescriptor::new("label", AttributeKind::Text))
                    .attribute(AttributeDescriptor::new("weight", AttributeKind::Int).with_default(0))
                    .unique("label"),
                EntityDescriptor::new("Note")
                    .attribute(AttributeDescriptor::new("body", AttributeKind::Text).optional()),
            ])
            .unwrap(),
        )
    }

    fn test_config(dir: &TempDir) -> StoreConfig {
        StoreConfig {
            path: dir.path().join("store"),
            create_if_missing: true,
            checkpoint_interval: 0,
            logging_enabled: false,
        }
    }

    fn tag(label: &str, weight: i64) -> StoredObject {
        let mut attributes = Attributes::new();
        attributes.insert("label".into(), Value::from(label));
        attributes.insert("weight".into(), Value::Int(weight));
        StoredObject {
            entity: "Tag".into(),
            attributes,
        }
    }

    fn insert(store: &EntityStore, pending: &mut PendingChanges, object: StoredObject) -> ObjectId {
        let id = store.allocate_id();
        pending.inserted.insert(id, object);
        id
    }

    fn request(schema: &Schema, entity: &str, options: FetchOptions) -> FetchRequest {
        QueryBuilder::new(schema).build(entity, options).unwrap()
    }

    #[test]
    fn test_create_store() {
        let dir = TempDir::new().unwrap();
        let store = EntityStore::open(test_config(&dir), schema()).unwrap();

        assert!(store.path().join("MANIFEST").exists());
        assert!(store.path().join("journal.log").exists());
        assert_eq!(store.stats().object_count, 0);
    }

    #[test]
    fn test_missing_store_without_create() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            create_if_missing: false,
            ..test_config(&dir)
        };
        let result = EntityStore::open(config, schema());
        assert!(matches!(result, Err(StoreError::Configuration(_))));
    }

    #[test]
    fn test_pending_overlay_visible_to_reads() {
        let dir = TempDir::new().unwrap();
        let schema = schema();
        let store = EntityStore::open(test_config(&dir), Arc::clone(&schema)).unwrap();

        let mut pending = PendingChanges::default();
        let id = insert(&store, &mut pending, tag("red", 1));

        let all = request(&schema, "Tag", FetchOptions::all());
        assert_eq!(store.execute(&pending, &all).unwrap().len(), 1);
        assert!(store.execute(&PendingChanges::default(), &all).unwrap().is_empty());
        assert_eq!(store.get(&pending, id).unwrap().get("label").as_str(), Some("red"));
    }

    #[test]
    fn test_save_and_reopen() {
        let dir = TempDir::new().unwrap();
        let schema = schema();
        let config = test_config(&dir);

        let id = {
            let store = EntityStore::open(config.clone(), Arc::clone(&schema)).unwrap();
            let mut pending = PendingChanges::default();
            let id = insert(&store, &mut pending, tag("red", 1));
            insert(&store, &mut pending, tag("blue", 2));
            let change_set = store.save(&pending).unwrap();
            assert_eq!(change_set.sequence, 1);
            assert_eq!(change_set.inserted.len(), 2);
            id
        };

        let store = EntityStore::open(config, Arc::clone(&schema)).unwrap();
        let empty = PendingChanges::default();
        let all = request(&schema, "Tag", FetchOptions::ordered("weight", true));
        let tags = store.execute(&empty, &all).unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].id(), id);

        // Fresh ids continue past the replayed ones.
        assert!(store.allocate_id().0 > id.0 + 1);
    }

    #[test]
    fn test_checkpoint_then_reopen() {
        let dir = TempDir::new().unwrap();
        let schema = schema();
        let config = StoreConfig {
            checkpoint_interval: 2,
            ..test_config(&dir)
        };

        {
            let store = EntityStore::open(config.clone(), Arc::clone(&schema)).unwrap();
            for (i, label) in ["a", "b", "c"].iter().enumerate() {
                let mut pending = PendingChanges::default();
                insert(&store, &mut pending, tag(label, i as i64));
                store.save(&pending).unwrap();
            }
            // Two commits folded into the snapshot, one left in the journal.
            assert_eq!(store.stats().journal_entries, 1);
            assert!(store.path().join("objects.bin").exists());
        }

        let store = EntityStore::open(config, Arc::clone(&schema)).unwrap();
        let stats = store.stats();
        assert_eq!(stats.object_count, 3);
        assert_eq!(stats.last_sequence, 3);
        assert_eq!(stats.entity_counts.get("Tag"), Some(&3));
    }

    #[test]
    fn test_constraint_violation_leaves_store_unchanged() {
        let dir = TempDir::new().unwrap();
        let schema = schema();
        let store = EntityStore::open(test_config(&dir), Arc::clone(&schema)).unwrap();

        let mut pending = PendingChanges::default();
        insert(&store, &mut pending, tag("red", 1));
        store.save(&pending).unwrap();

        let mut pending = PendingChanges::default();
        insert(&store, &mut pending, tag("red", 2));
        let result = store.save(&pending);
        assert!(matches!(
            result,
            Err(StoreError::Persistence(PersistenceError::Constraint(_)))
        ));
        assert_eq!(store.stats().object_count, 1);
        assert_eq!(store.stats().last_sequence, 1);
    }

    #[test]
    fn test_required_attribute_enforced() {
        let dir = TempDir::new().unwrap();
        let store = EntityStore::open(test_config(&dir), schema()).unwrap();

        let mut pending = PendingChanges::default();
        let mut object = tag("x", 1);
        object.attributes.insert("label".into(), Value::Null);
        insert(&store, &mut pending, object);

        assert!(store.save(&pending).unwrap_err().is_recoverable());
    }

    #[test]
    fn test_predicate_on_undeclared_attribute() {
        let dir = TempDir::new().unwrap();
        let schema = schema();
        let store = EntityStore::open(test_config(&dir), Arc::clone(&schema)).unwrap();

        let bad = request(&schema, "Tag", FetchOptions::filtered(Predicate::eq("colour", "red")));
        let result = store.execute(&PendingChanges::default(), &bad);
        assert!(matches!(result, Err(StoreError::InvalidQuery(_))));
    }

    #[test]
    fn test_count_matches_execute() {
        let dir = TempDir::new().unwrap();
        let schema = schema();
        let store = EntityStore::open(test_config(&dir), Arc::clone(&schema)).unwrap();

        let mut pending = PendingChanges::default();
        for (label, weight) in [("a", 1), ("b", 5), ("c", 9)] {
            insert(&store, &mut pending, tag(label, weight));
        }

        let heavy = request(&schema, "Tag", FetchOptions::filtered(Predicate::gt("weight", 2)));
        assert_eq!(store.count(&pending, &heavy).unwrap(), 2);
        assert_eq!(store.execute(&pending, &heavy).unwrap().len(), 2);
    }

    #[test]
    fn test_store_lock() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        let _store1 = EntityStore::open(config.clone(), schema()).unwrap();

        // Second store should fail to acquire lock
        let result = EntityStore::open(config, schema());
        assert!(matches!(result, Err(StoreError::Locked)));
    }

    #[test]
    fn test_schema_mismatch() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        drop(EntityStore::open(config.clone(), schema()).unwrap());

        let other = Arc::new(
            Schema::new(vec![EntityDescriptor::new("Tag")
                .attribute(AttributeDescriptor::new("label", AttributeKind::Text))])
            .unwrap(),
        );
        let result = EntityStore::open(config, other);
        assert!(matches!(result, Err(StoreError::Configuration(_))));
    }
}
