//! Canonical fetch request values.

use crate::predicate::Predicate;
use crate::types::{Attributes, NULL_VALUE};
use std::cmp::Ordering;
use std::fmt;

/// One sort key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortDescriptor {
    pub attribute: String,
    pub ascending: bool,
}

impl SortDescriptor {
    pub fn new(attribute: impl Into<String>, ascending: bool) -> Self {
        Self {
            attribute: attribute.into(),
            ascending,
        }
    }

    pub fn ascending(attribute: impl Into<String>) -> Self {
        Self::new(attribute, true)
    }

    pub fn descending(attribute: impl Into<String>) -> Self {
        Self::new(attribute, false)
    }
}

/// A resolved query: entity, optional filter, ordering and optional limit.
///
/// Built fresh for every facade call; only a live query keeps one around.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchRequest {
    pub entity: String,
    pub predicate: Option<Predicate>,
    /// Empty means store-defined order.
    pub ordering: Vec<SortDescriptor>,
    /// `None` is unbounded; `Some(0)` yields nothing.
    pub limit: Option<usize>,
}

impl FetchRequest {
    /// Whether an object's attributes pass the filter.
    pub fn matches(&self, attributes: &Attributes) -> bool {
        self.predicate
            .as_ref()
            .map_or(true, |p| p.evaluate(attributes))
    }

    /// Compare two objects under the request's ordering.
    ///
    /// Returns `Equal` when no ordering is set or all keys tie.
    pub fn compare(&self, a: &Attributes, b: &Attributes) -> Ordering {
        for descriptor in &self.ordering {
            let left = a.get(&descriptor.attribute).unwrap_or(&NULL_VALUE);
            let right = b.get(&descriptor.attribute).unwrap_or(&NULL_VALUE);
            let ordering = left.total_cmp(right);
            let ordering = if descriptor.ascending {
                ordering
            } else {
                ordering.reverse()
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FETCH {}", self.entity)?;
        if let Some(ref predicate) = self.predicate {
            write!(f, " WHERE {}", predicate)?;
        }
        if !self.ordering.is_empty() {
            write!(f, " ORDER BY ")?;
            for (i, d) in self.ordering.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{} {}", d.attribute, if d.ascending { "ASC" } else { "DESC" })?;
            }
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {}", limit)?;
        }
        Ok(())
    }
}
