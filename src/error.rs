/*!
 * Error types for Halo
 */

use std::fmt;
use std::io;

use halo_core_cache::CacheError;
use halo_core_resilience::QueryError;

pub type Result<T> = std::result::Result<T, HaloError>;

#[derive(Debug)]
pub enum HaloError {
    /// Configuration error
    Config(String),

    /// Cache tier setup failed
    Cache(CacheError),

    /// A query failed after retries and fallbacks
    Query(QueryError),

    /// I/O error
    Io(io::Error),

    /// Serialization error
    Serialization(serde_json::Error),
}

impl fmt::Display for HaloError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaloError::Config(msg) => write!(f, "Configuration error: {}", msg),
            HaloError::Cache(err) => write!(f, "Cache error: {}", err),
            HaloError::Query(err) => write!(f, "Query error: {}", err),
            HaloError::Io(err) => write!(f, "I/O error: {}", err),
            HaloError::Serialization(err) => write!(f, "Serialization error: {}", err),
        }
    }
}

impl std::error::Error for HaloError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HaloError::Cache(err) => Some(err),
            HaloError::Query(err) => Some(err),
            HaloError::Io(err) => Some(err),
            HaloError::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CacheError> for HaloError {
    fn from(err: CacheError) -> Self {
        HaloError::Cache(err)
    }
}

impl From<QueryError> for HaloError {
    fn from(err: QueryError) -> Self {
        HaloError::Query(err)
    }
}

impl From<io::Error> for HaloError {
    fn from(err: io::Error) -> Self {
        HaloError::Io(err)
    }
}

impl From<serde_json::Error> for HaloError {
    fn from(err: serde_json::Error) -> Self {
        HaloError::Serialization(err)
    }
}
