//! # Entity Access
//!
//! A persistence-access layer over a named-entity object store: insert,
//! update, delete, select, count and live queries, all through one shared
//! unit of work with explicit commit and rollback.
//!
//! ## Core Concepts
//!
//! - **Schema**: the entities and their typed attributes, declared up front
//! - **Unit of Work**: pending changes, visible to reads, durable on commit
//! - **Fetch Request**: entity + predicate + ordering + limit, built from
//!   [`FetchOptions`]
//! - **Live Query**: a standing fetch whose sectioned results follow commits
//!
//! ## Example
//!
//! ```ignore
//! use entity_access::*;
//!
//! let schema = Schema::new(vec![EntityDescriptor::new("Task")
//!     .attribute(AttributeDescriptor::new("title", AttributeKind::Text))
//!     .attribute(AttributeDescriptor::new("done", AttributeKind::Bool).with_default(false))
//!     .attribute(AttributeDescriptor::new("createdAt", AttributeKind::Timestamp))])?;
//!
//! let access = DataAccess::open(schema, StoreConfig::at("./tasks"))?;
//!
//! let mut task = access.insert("Task")?;
//! task.set("title", "write docs").set("createdAt", Timestamp::now());
//! access.update(&task)?;
//! access.commit()?;
//!
//! let open = access.count("Task", Some(Predicate::eq("done", false)))?;
//! ```

pub mod access;
pub mod context;
pub mod engine;
pub mod error;
pub mod live;
pub mod predicate;
pub mod query;
pub mod schema;
pub mod transaction;
pub mod types;

// Re-exports
pub use access::DataAccess;
pub use context::{CommitSummary, Context, PendingChanges};
pub use engine::{EntityStore, StoreConfig, StoreStats};
pub use error::{PersistenceError, Result, StoreError};
pub use live::{
    IndexPath, LiveEvent, LiveQuery, LiveQueryId, ObjectChange, ResultChanges, Section,
    SectionChange,
};
pub use predicate::{Comparison, Predicate};
pub use query::{FetchOptions, FetchRequest, QueryBuilder, SortDescriptor};
pub use schema::{AttributeDescriptor, AttributeKind, EntityDescriptor, Schema};
pub use transaction::TransactionManager;
pub use types::*;
