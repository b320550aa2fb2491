//! Functional coverage and constrained random verification for hardware
//! testbenches.
//!
//! Facade over the two subsystem crates:
//! - [`vigil_coverage`]: hierarchical coverage database, cover points /
//!   crosses / checks, sampler bindings, export and merge
//! - [`vigil_crv`]: randomized objects with declarative constraints and a
//!   finite-domain solver
//!
//! A coverage-driven generation loop uses both: query hit state from the
//! coverage database and feed it back into constraints to steer future
//! draws away from covered regions.

pub use vigil_coverage as coverage;
pub use vigil_crv as crv;

pub use vigil_coverage::{
    rel, CoverCheckBuilder, CoverCrossBuilder, CoverPointBuilder, CoverageDb, CoverageError,
    IgnoreSpec, SampleArgs, SampleValue, Sampler,
};
pub use vigil_crv::{BacktrackSolver, Constraint, CrvError, CspSolver, RandCore, Randomized};
