//! Constrained random stimulus generation
//!
//! This crate provides:
//! - [`RandCore`] / [`Randomized`]: the stateful host for random variables,
//!   constraints and distributions, with `randomize`/`randomize_with`
//! - [`Constraint`]: hard predicates and distribution weights over named
//!   object variables
//! - [`CspSolver`] / [`BacktrackSolver`]: the pluggable finite-domain
//!   backend enumerating satisfying assignments
//!
//! ```
//! use vigil_crv::{Constraint, RandCore, Randomized};
//!
//! struct Point {
//!     core: RandCore,
//! }
//!
//! impl Randomized for Point {
//!     fn rand_core(&self) -> &RandCore {
//!         &self.core
//!     }
//!     fn rand_core_mut(&mut self) -> &mut RandCore {
//!         &mut self.core
//!     }
//! }
//!
//! let mut core = RandCore::with_seed(42);
//! core.set("x", 0);
//! core.set("y", 0);
//! core.add_rand("x", -10..10i64).unwrap();
//! core.add_rand("y", -10..10i64).unwrap();
//! core.add_constraint(Constraint::hard(["x", "y"], |v| v[0].int() < v[1].int()))
//!     .unwrap();
//!
//! let mut point = Point { core };
//! point.randomize().unwrap();
//! assert!(point.rand_core().int("x") < point.rand_core().int("y"));
//! ```

pub mod constraint;
pub mod error;
pub mod randomized;
pub mod solver;

pub use constraint::Constraint;
pub use error::{CrvError, Result};
pub use randomized::{RandCore, Randomized};
pub use solver::{Assignment, BacktrackSolver, BoundPredicate, CspSolver};
