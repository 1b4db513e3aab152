//! Placement errors.

use thiserror::Error;

/// A directive that cannot be parsed in its grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectiveError {
    #[error("empty placement directive")]
    Empty,

    #[error("invalid container type: {container}")]
    InvalidContainer { container: String },

    #[error("invalid unit index: {index}")]
    BadUnitIndex { index: String },

    #[error("malformed placement directive: {0}")]
    Malformed(String),
}

/// Services whose placements point at each other.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("placement cycle between applications: {}", services.join(", "))]
pub struct CycleError {
    pub services: Vec<String>,
}
