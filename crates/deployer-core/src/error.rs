//! Error types for bundle loading and charm lookup.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for bundle operations.
pub type BundleResult<T> = Result<T, BundleError>;

/// Result type alias for charm metadata lookups.
pub type CharmResult<T> = Result<T, CharmError>;

/// Errors raised while loading a bundle document.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("failed to read bundle {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid bundle document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("bundle document must be a mapping")]
    NotAMapping,

    #[error("stack not found in bundle: {0}")]
    StackNotFound(String),

    #[error("bundle contains several stacks, pick one of: {}", .0.join(", "))]
    AmbiguousStack(Vec<String>),

    #[error("malformed relation entry: {0}")]
    MalformedRelation(String),
}

/// Errors raised while resolving charm metadata.
#[derive(Debug, Error)]
pub enum CharmError {
    #[error("application {0} has no charm")]
    MissingCharm(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid charm metadata in {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// A constraint string that could not be parsed.
#[derive(Debug, Error)]
pub enum ConstraintError {
    #[error("constraint {0:?} is not of the form key=value")]
    MissingValue(String),

    #[error("invalid size {value:?} for constraint {key}")]
    InvalidSize { key: String, value: String },

    #[error("invalid integer {value:?} for constraint {key}")]
    InvalidInteger { key: String, value: String },

    #[error("size pattern: {0}")]
    Pattern(#[from] regex::Error),
}
