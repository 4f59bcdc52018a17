//! Types shared by live queries and their registry.

use crate::types::{ManagedObject, ObjectId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a registered live query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LiveQueryId(pub u64);

/// Position of an object inside sectioned results.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexPath {
    pub section: usize,
    pub row: usize,
}

impl IndexPath {
    pub fn new(section: usize, row: usize) -> Self {
        Self { section, row }
    }
}

impl fmt::Display for IndexPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.section, self.row)
    }
}

/// One group of results sharing a section key value.
#[derive(Clone, Debug, PartialEq)]
pub struct Section {
    /// Display form of the key value; `""` for null or no key.
    pub name: String,
    pub objects: Vec<ManagedObject>,
}

impl Section {
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// A section appearing, disappearing or changing position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SectionChange {
    /// `index` is in the new state.
    Insert { index: usize, name: String },
    /// `index` is in the prior state.
    Delete { index: usize, name: String },
    /// The section and its objects moved from `old_index` to `new_index`.
    Move {
        old_index: usize,
        new_index: usize,
        name: String,
    },
}

/// One object's change between two states of a live query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectChange {
    Insert {
        id: ObjectId,
        new_path: IndexPath,
    },
    Delete {
        id: ObjectId,
        old_path: IndexPath,
    },
    Move {
        id: ObjectId,
        old_path: IndexPath,
        new_path: IndexPath,
    },
    Update {
        id: ObjectId,
        old_path: IndexPath,
        new_path: IndexPath,
    },
}

impl ObjectChange {
    pub fn id(&self) -> ObjectId {
        match self {
            ObjectChange::Insert { id, .. }
            | ObjectChange::Delete { id, .. }
            | ObjectChange::Move { id, .. }
            | ObjectChange::Update { id, .. } => *id,
        }
    }
}

/// Everything that changed in a live query's results for one commit.
///
/// Section changes come first: deletes by descending old index, inserts by
/// ascending new index, then moves by new index. Object changes follow the
/// same rule, then moves and updates by new path. Objects inside a moved
/// section travel with it and are not reported as moves of their own.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultChanges {
    pub sections: Vec<SectionChange>,
    pub objects: Vec<ObjectChange>,
}

impl ResultChanges {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty() && self.objects.is_empty()
    }

    pub fn inserts(&self) -> impl Iterator<Item = &ObjectChange> {
        self.objects
            .iter()
            .filter(|c| matches!(c, ObjectChange::Insert { .. }))
    }

    pub fn deletes(&self) -> impl Iterator<Item = &ObjectChange> {
        self.objects
            .iter()
            .filter(|c| matches!(c, ObjectChange::Delete { .. }))
    }

    pub fn moves(&self) -> impl Iterator<Item = &ObjectChange> {
        self.objects
            .iter()
            .filter(|c| matches!(c, ObjectChange::Move { .. }))
    }

    pub fn updates(&self) -> impl Iterator<Item = &ObjectChange> {
        self.objects
            .iter()
            .filter(|c| matches!(c, ObjectChange::Update { .. }))
    }
}

/// Events delivered to a live query's receiver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum LiveEvent {
    /// Results changed; the new state is visible once this is received.
    Changed(ResultChanges),
    /// Recomputing failed; the previous results are kept.
    Error(String),
    /// The query was released and will receive nothing more.
    Released,
}
