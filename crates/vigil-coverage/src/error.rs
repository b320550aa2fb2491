//! Error types for the coverage engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoverageError>;

#[derive(Debug, Error)]
pub enum CoverageError {
    #[error("Coverage item already registered: {0}")]
    DuplicateName(String),

    #[error("Unknown coverage item: {0}")]
    UnknownName(String),

    #[error("Invalid coverage item name: {0:?}")]
    InvalidName(String),

    #[error("Coverage leaf must have a parent group: {0}")]
    MissingParent(String),

    #[error("Parent of a coverage item cannot be a leaf: {0}")]
    ParentIsLeaf(String),

    #[error("{name}: {labels} labels given for {bins} bins")]
    LabelLength {
        name: String,
        bins: usize,
        labels: usize,
    },

    #[error("Cross {cross} references unknown item: {item}")]
    UnknownCrossItem { cross: String, item: String },

    #[error("Cross {cross} item is not a cover point: {item}")]
    NotACoverPoint { cross: String, item: String },

    #[error("Cross {cross}: ignore tuple has {got} positions, expected {expected}")]
    IgnoreArity {
        cross: String,
        expected: usize,
        got: usize,
    },

    #[error("Invalid weight for {0}: must be at least 1")]
    InvalidWeight(String),

    #[error("Invalid at_least for {0}: must be at least 1")]
    InvalidAtLeast(String),

    #[error("Invalid callback threshold {0}: must be in (0, 100]")]
    InvalidThreshold(f64),

    #[error("Not a coverage leaf: {0}")]
    NotALeaf(String),

    #[error("{item}: sample has no argument named {vname:?}")]
    UnknownArgument { item: String, vname: String },

    #[error("{0}: sampled with no arguments")]
    EmptySample(String),

    #[error("Re-entrant sample on coverage leaf: {0}")]
    Reentrancy(String),

    #[error("Coverage callback failed: {0}")]
    Callback(String),

    #[error("Unsupported export format: {0}")]
    Format(String),

    #[error("Merge mismatch at {path}: {reason}")]
    MergeMismatch { path: String, reason: String },

    #[error("XML parse error: {0}")]
    Xml(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
