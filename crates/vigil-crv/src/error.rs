//! Error types for the randomization engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CrvError>;

#[derive(Debug, Error)]
pub enum CrvError {
    #[error("Unknown object variable: {0}")]
    UnknownVariable(String),

    #[error("Random variable {0} declared after a constraint was added")]
    RandAfterConstraint(String),

    #[error("Empty domain for random variable: {0}")]
    EmptyDomain(String),

    #[error("Constraint {0} references no random variable")]
    NoRandomVariable(String),

    #[error("Invalid solve order: {0}")]
    SolveOrder(String),

    #[error("Solver failed for variables [{}] with constraints [{}]",
            .variables.join(", "), .constraints.join(", "))]
    SolverFailed {
        variables: Vec<String>,
        constraints: Vec<String>,
    },

    #[error("Distribution {constraint} returned negative weight {value}")]
    NegativeWeight { constraint: String, value: f64 },
}
