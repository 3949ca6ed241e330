use std::path::PathBuf;
use thiserror::Error;

/// Failures while building a fingerprint database.
///
/// I/O problems (missing or unreadable file) are kept apart from content
/// problems so callers can tell a bad deployment from a bad survey.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read fingerprint database {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed fingerprint row at line {line}: expected {expected} columns, found {found}")]
    Malformed {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("invalid number {value:?} at line {line}, column {column}")]
    InvalidNumber {
        line: usize,
        column: usize,
        value: String,
    },

    #[error("fingerprint database is empty")]
    Empty,
}

/// Numeric failures inside the Kalman filter. The filter state is left
/// untouched whenever one of these is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    #[error("innovation covariance is singular or ill-conditioned (det = {determinant:e})")]
    SingularInnovation { determinant: f64 },

    #[error("innovation covariance is not positive definite")]
    NotPositiveDefinite,

    #[error("update produced non-finite state")]
    NonFinite,

    #[error("fix ({x}, {y}) is not finite")]
    NonFiniteFix { x: f64, y: f64 },

    #[error("unknown measurement source {0:?}")]
    UnknownSource(String),
}

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("k must be at least 1 when K-NN filtering is enabled")]
    ZeroNeighbours,

    #[error("threshold must be a finite, non-negative squared distance (got {0})")]
    InvalidThreshold(f64),

    #[error("{name} must lie within [0, 1] (got {value})")]
    OutOfUnitRange { name: &'static str, value: f64 },

    #[error("{name} must be positive and finite (got {value})")]
    NonPositive { name: &'static str, value: f64 },

    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failures while building a fingerprint matcher from a database file.
#[derive(Debug, Error)]
pub enum LocatorError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Failures while reading a recorded session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot read session {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read session line {line}: {source}")]
    Read {
        line: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("bad session event at line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}
