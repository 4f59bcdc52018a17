//! Caller-held handle to a standing query.

use super::diff::partition;
use super::registry::LiveShared;
use super::types::{IndexPath, LiveEvent, Section};
use crate::context::Context;
use crate::error::{Result, StoreError};
use crate::query::FetchRequest;
use crate::types::{ManagedObject, ObjectId};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A query whose sectioned results follow every commit and rollback.
///
/// Results are available through the accessors at any time; each change is
/// also reported as a [`LiveEvent`] on the query's channel. Dropping the
/// query releases it.
pub struct LiveQuery {
    context: Arc<Context>,
    shared: Arc<LiveShared>,
    receiver: Receiver<LiveEvent>,
}

impl LiveQuery {
    pub(crate) fn start(
        context: Arc<Context>,
        request: FetchRequest,
        section_key: Option<String>,
    ) -> Result<Self> {
        let descriptor = context.store().schema().entity(&request.entity)?;
        if let Some(ref key) = section_key {
            if !descriptor.has_attribute(key) {
                return Err(StoreError::InvalidQuery(format!(
                    "section key '{}' is not an attribute of {}",
                    key, request.entity
                )));
            }
        }

        // Register under the read lock so no commit slips in between the
        // initial fetch and registration.
        let (shared, receiver) = {
            let pending = context.read();
            let objects = context.store().execute(&pending, &request)?;
            let sections = partition(objects, section_key.as_deref());
            context.live().register(request, section_key, sections)
        };

        debug!(query = shared.id.0, request = %shared.request, "live query started");

        Ok(Self {
            context,
            shared,
            receiver,
        })
    }

    /// Current sections.
    pub fn sections(&self) -> Vec<Section> {
        self.shared.sections.lock().clone()
    }

    /// Current results in order, across all sections.
    pub fn objects(&self) -> Vec<ManagedObject> {
        self.shared
            .sections
            .lock()
            .iter()
            .flat_map(|s| s.objects.iter().cloned())
            .collect()
    }

    pub fn object_at(&self, path: IndexPath) -> Option<ManagedObject> {
        self.shared
            .sections
            .lock()
            .get(path.section)
            .and_then(|s| s.objects.get(path.row))
            .cloned()
    }

    pub fn index_path_of(&self, id: ObjectId) -> Option<IndexPath> {
        let sections = self.shared.sections.lock();
        sections.iter().enumerate().find_map(|(s, section)| {
            section
                .objects
                .iter()
                .position(|o| o.id() == id)
                .map(|row| IndexPath::new(s, row))
        })
    }

    pub fn section_count(&self) -> usize {
        self.shared.sections.lock().len()
    }

    pub fn is_active(&self) -> bool {
        self.shared.is_active()
    }

    /// The request this query re-runs.
    pub fn request(&self) -> &FetchRequest {
        &self.shared.request
    }

    pub fn section_key(&self) -> Option<&str> {
        self.shared.section_key.as_deref()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<LiveEvent, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> std::result::Result<LiveEvent, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// The underlying event channel.
    pub fn events(&self) -> &Receiver<LiveEvent> {
        &self.receiver
    }

    /// Stop following changes. Sends [`LiveEvent::Released`] once.
    pub fn release(&self) {
        if self.shared.deactivate() {
            self.context.live().unregister(self.shared.id);
            self.shared.send(LiveEvent::Released);
            debug!(query = self.shared.id.0, "live query released");
        }
    }
}

impl Drop for LiveQuery {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for LiveQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveQuery")
            .field("id", &self.shared.id)
            .field("request", &self.shared.request)
            .field("section_key", &self.shared.section_key)
            .field("active", &self.is_active())
            .finish()
    }
}
