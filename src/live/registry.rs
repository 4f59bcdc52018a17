//! Registry of live queries attached to a context.

use super::diff::{diff, partition};
use super::types::{LiveEvent, LiveQueryId, Section};
use crate::context::PendingChanges;
use crate::engine::EntityStore;
use crate::query::FetchRequest;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// State shared between a live query handle and the registry.
pub(crate) struct LiveShared {
    pub(crate) id: LiveQueryId,
    pub(crate) request: FetchRequest,
    pub(crate) section_key: Option<String>,
    pub(crate) sections: Mutex<Vec<Section>>,
    sender: Sender<LiveEvent>,
    active: AtomicBool,
}

impl LiveShared {
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Flip to released. True only for the first caller.
    pub(crate) fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::SeqCst)
    }

    /// Best effort; the receiver may already be gone.
    pub(crate) fn send(&self, event: LiveEvent) {
        let _ = self.sender.send(event);
    }

    /// Recompute results and report the difference.
    fn refresh(&self, store: &EntityStore, pending: &PendingChanges) {
        let objects = match store.execute(pending, &self.request) {
            Ok(objects) => objects,
            Err(e) => {
                warn!(query = self.id.0, error = %e, "live query refresh failed");
                self.send(LiveEvent::Error(e.to_string()));
                return;
            }
        };

        let fresh = partition(objects, self.section_key.as_deref());

        let mut sections = self.sections.lock();
        let changes = diff(&sections, &fresh);
        if changes.is_empty() {
            return;
        }

        debug!(
            query = self.id.0,
            sections = changes.sections.len(),
            objects = changes.objects.len(),
            "live query changed"
        );

        // Held across the send so readers never see new state before the event.
        self.send(LiveEvent::Changed(changes));
        *sections = fresh;
    }
}

/// Live queries registered with one context.
pub(crate) struct LiveRegistry {
    queries: RwLock<HashMap<LiveQueryId, Arc<LiveShared>>>,
    next_id: AtomicU64,
}

impl LiveRegistry {
    pub(crate) fn new() -> Self {
        Self {
            queries: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a query with its initial results.
    pub(crate) fn register(
        &self,
        request: FetchRequest,
        section_key: Option<String>,
        sections: Vec<Section>,
    ) -> (Arc<LiveShared>, Receiver<LiveEvent>) {
        let id = LiveQueryId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = unbounded();

        let shared = Arc::new(LiveShared {
            id,
            request,
            section_key,
            sections: Mutex::new(sections),
            sender,
            active: AtomicBool::new(true),
        });

        self.queries.write().insert(id, Arc::clone(&shared));
        (shared, receiver)
    }

    pub(crate) fn unregister(&self, id: LiveQueryId) {
        self.queries.write().remove(&id);
    }

    pub(crate) fn count(&self) -> usize {
        self.queries.read().len()
    }

    /// Bring every query over a touched entity up to date.
    pub(crate) fn refresh(
        &self,
        store: &EntityStore,
        pending: &PendingChanges,
        entities: &BTreeSet<String>,
    ) {
        let affected: Vec<Arc<LiveShared>> = self
            .queries
            .read()
            .values()
            .filter(|q| entities.contains(&q.request.entity))
            .cloned()
            .collect();

        for query in affected {
            if query.is_active() {
                query.refresh(store, pending);
            }
        }
    }
}

impl Default for LiveRegistry {
    fn default() -> Self {
        Self::new()
    }
}
