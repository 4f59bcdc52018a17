//! Live queries.
//!
//! A [`LiveQuery`] keeps a fetch request's results current. Every commit or
//! rollback that touches the query's entity recomputes the results, groups
//! them into [`Section`]s and, if anything changed, sends a
//! [`LiveEvent::Changed`] describing section and object changes:
//!
//! - `Delete` paths index the previous state, `Insert` paths the new one.
//! - Sections that keep their name but change position are reported as
//!   section moves, chosen the same way as object moves. Their objects
//!   travel with them.
//! - `Move` is reported for the fewest objects needed to explain the new
//!   order inside each surviving section, plus any object whose section
//!   changed.
//! - `Update` is reported for objects that stayed put within their section
//!   but whose values changed.
//!
//! Events are delivered before `commit` returns.
//!
//! # Example
//!
//! ```ignore
//! let live = access.live_query(
//!     "Task",
//!     FetchOptions::filtered(Predicate::eq("done", false)).order_by("createdAt", true),
//!     None,
//! )?;
//!
//! let mut task = access.insert("Task")?;
//! task.set("title", "write docs");
//! access.update(&task)?;
//! access.commit()?;
//!
//! match live.try_recv() {
//!     Ok(LiveEvent::Changed(changes)) => println!("{} inserted", changes.inserts().count()),
//!     _ => {}
//! }
//! ```

mod controller;
mod diff;
mod registry;
mod types;

pub use controller::LiveQuery;
pub(crate) use registry::LiveRegistry;
pub use types::{
    IndexPath, LiveEvent, LiveQueryId, ObjectChange, ResultChanges, Section, SectionChange,
};
