//! Functional coverage for hardware testbenches
//!
//! This crate provides:
//! - A hierarchical coverage database keyed by dotted names, with group
//!   nodes materialized on demand and aggregates maintained bottom-up
//! - Cover points, crosses and checks as registerable leaves
//! - Sampler bindings that deliver one call's arguments to a stack of leaves
//! - Threshold and bins callbacks, fired synchronously inside the update
//! - XML/YAML export and element-wise hit merge
//!
//! The database is process-scoped (one per thread) and driven from a single
//! simulator event loop; nothing here is safe to share across threads.
//!
//! ```no_run
//! use vigil_coverage::{CoverPointBuilder, CoverageDb, SampleArgs, Sampler, rel};
//!
//! CoverPointBuilder::new("memory.address")
//!     .bins([(0, 50), (51, 150), (151, 255)])
//!     .rel(rel::in_range)
//!     .vname("addr")
//!     .register()?;
//!
//! let sampler = Sampler::new(["memory.address"])?;
//! sampler.sample(&SampleArgs::new().arg("addr", 25))?;
//!
//! CoverageDb::with(|db| {
//!     assert_eq!(db.get("memory.address")?.coverage(), 1);
//!     Ok::<_, vigil_coverage::CoverageError>(())
//! })?;
//! # Ok::<_, vigil_coverage::CoverageError>(())
//! ```

pub mod check;
pub mod cross;
pub mod db;
pub mod error;
pub mod export;
pub mod item;
pub mod matcher;
pub mod point;
pub mod sampler;
pub mod value;

pub use check::{CheckOutcome, CoverCheckBuilder};
pub use cross::{CoverCrossBuilder, IgnoreSpec};
pub use db::CoverageDb;
pub use error::{CoverageError, Result};
pub use export::{BinSnapshot, CoverageSnapshot, ItemSnapshot};
pub use item::{CallbackResult, CoverItem};
pub use matcher::{rel, BinMatcher};
pub use point::CoverPointBuilder;
pub use sampler::Sampler;
pub use value::{SampleArgs, SampleValue};
