//! # tessera-core
//!
//! Core primitives for Tessera, a tiled Earth-observation statistics
//! pipeline. This crate defines the units of work and how they are
//! enumerated, persisted, and addressed:
//!
//! - **Task identity**: [`task_key::TaskKey`] maps a (spatial tile, time
//!   period) pair to a stable, order-insensitive string form
//! - **Dataset model**: [`dataset::TaskRecord`] ties a task to its source
//!   dataset references
//! - **Task catalog**: [`catalog::TaskCatalog`] is the persisted, ordered
//!   registry of all tasks for a run
//! - **Selection**: [`selection`] parses task specifications (explicit
//!   keys, indices, slices) into concrete catalog positions
//!
//! ## Crate Boundary
//!
//! `tessera-core` holds no execution or transport logic. Workers, queues,
//! and run orchestration live in `tessera-flow`; this crate only answers
//! "what is a task" and "which tasks does this run mean".
//!
//! ## Example
//!
//! ```rust
//! use tessera_core::prelude::*;
//!
//! let key: TaskKey = "2016--P1Y/x+003/y-004".parse().unwrap();
//! assert_eq!(key.to_string(), "2016--P1Y/x+003/y-004");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod catalog;
pub mod dataset;
pub mod error;
pub mod selection;
pub mod task_key;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use tessera_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::catalog::TaskCatalog;
    pub use crate::dataset::{DatasetRef, TaskRecord};
    pub use crate::error::{Error, Result};
    pub use crate::selection::{SelectionOutcome, TaskSpecifier};
    pub use crate::task_key::{Period, TaskKey};
}
