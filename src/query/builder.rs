//! Turning caller options into a canonical [`FetchRequest`].

use super::request::{FetchRequest, SortDescriptor};
use crate::error::{Result, StoreError};
use crate::predicate::Predicate;
use crate::schema::Schema;
use tracing::debug;

/// Optional query parameters, each defaulted independently.
///
/// Ordering can be given either as a full list of sort descriptors or as a
/// single `order_by(attribute, ascending)`; the two are equivalent and may
/// not be combined.
///
/// A limit without an ordering picks an unspecified subset of the matches:
/// which objects come back is up to the engine and may change between
/// calls or releases.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FetchOptions {
    pub predicate: Option<Predicate>,
    pub sort_descriptors: Option<Vec<SortDescriptor>>,
    pub order_by: Option<SortDescriptor>,
    pub limit: Option<usize>,
}

impl FetchOptions {
    /// No filter, store order, no limit.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn filtered(predicate: Predicate) -> Self {
        Self::default().with_predicate(predicate)
    }

    pub fn ordered(attribute: impl Into<String>, ascending: bool) -> Self {
        Self::default().order_by(attribute, ascending)
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Set the filter if one is given; `None` leaves it unset.
    pub fn with_optional_predicate(mut self, predicate: Option<Predicate>) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn order_by(mut self, attribute: impl Into<String>, ascending: bool) -> Self {
        self.order_by = Some(SortDescriptor::new(attribute, ascending));
        self
    }

    pub fn sort_by(mut self, descriptors: Vec<SortDescriptor>) -> Self {
        self.sort_descriptors = Some(descriptors);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Resolve the two ordering forms into one list.
    fn resolve_ordering(&self) -> Result<Vec<SortDescriptor>> {
        match (&self.sort_descriptors, &self.order_by) {
            (Some(_), Some(_)) => Err(StoreError::InvalidQuery(
                "sort descriptors and order_by cannot both be set".into(),
            )),
            (Some(descriptors), None) => Ok(descriptors.clone()),
            (None, Some(single)) => Ok(vec![single.clone()]),
            (None, None) => Ok(Vec::new()),
        }
    }
}

/// Builds fetch requests against a schema.
pub struct QueryBuilder<'a> {
    schema: &'a Schema,
    trace: bool,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            trace: false,
        }
    }

    /// Emit a debug trace for each request built.
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Resolve the entity and ordering into a request.
    pub fn build(&self, entity: &str, options: FetchOptions) -> Result<FetchRequest> {
        let descriptor = self.schema.entity(entity)?;
        let ordering = options.resolve_ordering()?;
        descriptor.check_attribute_names(ordering.iter().map(|d| d.attribute.as_str()))?;

        let request = FetchRequest {
            entity: descriptor.name.clone(),
            predicate: options.predicate,
            ordering,
            limit: options.limit,
        };

        if self.trace {
            debug!(
                entity = %request.entity,
                predicate = ?request.predicate,
                ordering = ?request.ordering,
                limit = ?request.limit,
                "built fetch request: {}",
                request
            );
        }

        Ok(request)
    }

    /// Request for a count: filter only, no ordering or limit.
    pub fn build_count(&self, entity: &str, predicate: Option<Predicate>) -> Result<FetchRequest> {
        self.build(entity, FetchOptions::all().with_optional_predicate(predicate))
    }
}
