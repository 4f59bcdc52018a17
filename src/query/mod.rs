//! Query building.
//!
//! Every read in the crate goes through one path: caller options
//! ([`FetchOptions`]) are resolved against the schema into a
//! [`FetchRequest`], which the engine then evaluates.
//!
//! # Example
//!
//! ```ignore
//! let options = FetchOptions::filtered(Predicate::eq("done", false))
//!     .order_by("createdAt", true)
//!     .limit(10);
//! let request = QueryBuilder::new(&schema).build("Task", options)?;
//! ```

mod builder;
mod request;

pub use builder::{FetchOptions, QueryBuilder};
pub use request::{FetchRequest, SortDescriptor};
