//! The access facade.
//!
//! [`DataAccess`] is the only type most callers need. Every read is turned
//! into a [`FetchRequest`](crate::query::FetchRequest) by the
//! [`QueryBuilder`] and run against the one shared unit of work, so
//! uncommitted changes are visible to later reads on the same facade.

use crate::context::CommitSummary;
use crate::engine::{EntityStore, StoreConfig, StoreStats};
use crate::error::Result;
use crate::live::LiveQuery;
use crate::predicate::Predicate;
use crate::query::{FetchOptions, FetchRequest, QueryBuilder};
use crate::schema::Schema;
use crate::transaction::TransactionManager;
use crate::types::{ManagedObject, ObjectId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Service object for inserting, updating, deleting and querying entities.
///
/// Construct one per store and share it (`Arc<DataAccess>`) where several
/// owners need it. All calls are synchronous.
///
/// # Example
///
/// ```ignore
/// let access = DataAccess::open(schema, StoreConfig::at("./tasks"))?;
///
/// let mut task = access.insert("Task")?;
/// task.set("title", "ship it").set("createdAt", Timestamp::now());
/// access.update(&task)?;
/// access.commit()?;
///
/// let open = access.select_many(
///     "Task",
///     FetchOptions::filtered(Predicate::eq("done", false)).order_by("createdAt", true),
/// )?;
/// ```
pub struct DataAccess {
    transactions: TransactionManager,
    logging: AtomicBool,
}

impl DataAccess {
    /// An unconfigured facade; call [`init_store`](Self::init_store) before use.
    pub fn new(schema: Schema) -> Self {
        Self {
            transactions: TransactionManager::new(Arc::new(schema)),
            logging: AtomicBool::new(false),
        }
    }

    /// Create a facade and open its store.
    pub fn open(schema: Schema, config: StoreConfig) -> Result<Self> {
        let access = Self::new(schema);
        access.init_store(config)?;
        Ok(access)
    }

    /// Configure the backing store. Fails with `Configuration` if called twice.
    pub fn init_store(&self, config: StoreConfig) -> Result<()> {
        let logging = config.logging_enabled;
        self.transactions.init_store(config)?;
        self.set_logging_enabled(logging);
        Ok(())
    }

    pub fn schema(&self) -> &Schema {
        self.transactions.schema()
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    /// Trace every built fetch request at debug level.
    pub fn set_logging_enabled(&self, enabled: bool) {
        self.logging.store(enabled, Ordering::SeqCst);
    }

    pub fn logging_enabled(&self) -> bool {
        self.logging.load(Ordering::SeqCst)
    }

    fn builder(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(self.schema()).with_trace(self.logging_enabled())
    }

    fn request(&self, entity: &str, options: FetchOptions) -> Result<FetchRequest> {
        self.builder().build(entity, options)
    }

    // --- Mutations ---

    /// New, uncommitted object with the entity's defaults applied.
    pub fn insert(&self, entity: &str) -> Result<ManagedObject> {
        self.schema().entity(entity)?;
        self.transactions.current_context()?.insert(entity)
    }

    /// Stage the object's values into the unit of work.
    pub fn update(&self, object: &ManagedObject) -> Result<()> {
        self.schema().entity(object.entity())?;
        self.transactions.current_context()?.update(object)
    }

    /// Mark an object for removal. Deleting twice is the same as once.
    pub fn delete(&self, object: &ManagedObject) -> Result<()> {
        self.schema().entity(object.entity())?;
        self.transactions.current_context()?.delete(object.id());
        Ok(())
    }

    /// Mark every matching object for removal; returns how many.
    pub fn delete_all(&self, entity: &str, predicate: Option<Predicate>) -> Result<usize> {
        let request = self.request(entity, FetchOptions::all().with_optional_predicate(predicate))?;
        self.transactions.current_context()?.delete_matching(&request)
    }

    // --- Reads ---

    /// All matching objects, ordered and limited per `options`.
    pub fn select_many(&self, entity: &str, options: FetchOptions) -> Result<Vec<ManagedObject>> {
        let request = self.request(entity, options)?;
        self.transactions.current_context()?.fetch(&request)
    }

    /// First matching object under the ordering, if any.
    pub fn select_one(&self, entity: &str, options: FetchOptions) -> Result<Option<ManagedObject>> {
        let limit = options.limit.map_or(1, |limit| limit.min(1));
        let request = self.request(entity, options.limit(limit))?;
        let mut objects = self.transactions.current_context()?.fetch(&request)?;
        Ok(if objects.is_empty() {
            None
        } else {
            Some(objects.swap_remove(0))
        })
    }

    /// Number of matching objects.
    pub fn count(&self, entity: &str, predicate: Option<Predicate>) -> Result<usize> {
        let request = self.builder().build_count(entity, predicate)?;
        self.transactions.current_context()?.count(&request)
    }

    /// Object by id as seen through the unit of work.
    pub fn object(&self, id: ObjectId) -> Result<Option<ManagedObject>> {
        Ok(self.transactions.current_context()?.get(id))
    }

    /// Start a live query. `section_key` must be an attribute of `entity`.
    pub fn live_query(
        &self,
        entity: &str,
        options: FetchOptions,
        section_key: Option<&str>,
    ) -> Result<LiveQuery> {
        let request = self.request(entity, options)?;
        let context = self.transactions.current_context()?;
        LiveQuery::start(context, request, section_key.map(str::to_string))
    }

    // --- Transactions ---

    pub fn commit(&self) -> Result<CommitSummary> {
        self.transactions.commit()
    }

    pub fn rollback(&self) {
        self.transactions.rollback()
    }

    pub fn has_changes(&self) -> bool {
        self.transactions.has_changes()
    }

    // --- Maintenance ---

    /// Fold the journal into a fresh snapshot now.
    pub fn checkpoint(&self) -> Result<()> {
        self.store()?.checkpoint()
    }

    pub fn stats(&self) -> Result<StoreStats> {
        Ok(self.store()?.stats())
    }

    fn store(&self) -> Result<Arc<EntityStore>> {
        self.transactions.store()
    }
}

impl std::fmt::Debug for DataAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataAccess")
            .field("entities", &self.schema().entity_names())
            .field("initialized", &self.transactions.is_initialized())
            .field("logging", &self.logging_enabled())
            .finish()
    }
}
