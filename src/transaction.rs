//! Ownership of the store and its single unit of work.

use crate::context::{CommitSummary, Context};
use crate::engine::{EntityStore, StoreConfig};
use crate::error::{Result, StoreError};
use crate::schema::Schema;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::info;

/// Holds the configured store and lazily creates the one shared [`Context`].
pub struct TransactionManager {
    schema: Arc<Schema>,
    store: RwLock<Option<Arc<EntityStore>>>,
    context: Mutex<Option<Arc<Context>>>,
}

impl TransactionManager {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            store: RwLock::new(None),
            context: Mutex::new(None),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Open the store. Allowed exactly once.
    pub fn init_store(&self, config: StoreConfig) -> Result<()> {
        let mut slot = self.store.write();
        if slot.is_some() {
            return Err(StoreError::Configuration(
                "store already initialized".into(),
            ));
        }

        let store = EntityStore::open(config, Arc::clone(&self.schema))?;
        info!(path = %store.path().display(), "store initialized");
        *slot = Some(Arc::new(store));
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.store.read().is_some()
    }

    /// The configured store.
    pub fn store(&self) -> Result<Arc<EntityStore>> {
        self.store
            .read()
            .clone()
            .ok_or_else(|| StoreError::Configuration("store not initialized".into()))
    }

    /// The shared context, created on first use.
    pub fn current_context(&self) -> Result<Arc<Context>> {
        let mut slot = self.context.lock();
        if let Some(ref context) = *slot {
            return Ok(Arc::clone(context));
        }

        let context = Arc::new(Context::new(self.store()?));
        *slot = Some(Arc::clone(&context));
        Ok(context)
    }

    /// Context if one exists, without creating it.
    fn existing_context(&self) -> Option<Arc<Context>> {
        self.context.lock().clone()
    }

    pub fn commit(&self) -> Result<CommitSummary> {
        self.current_context()?.commit()
    }

    /// Discard pending changes. A no-op before the store is configured.
    pub fn rollback(&self) {
        if let Some(context) = self.existing_context() {
            context.rollback();
        }
    }

    pub fn has_changes(&self) -> bool {
        self.existing_context()
            .map_or(false, |context| context.has_changes())
    }
}
