use std::fmt;

use pgrx::pg_sys::panic::ErrorReport;
use pgrx::{PgLogLevel, PgSqlErrorCode};

pub mod testing;

/// Main error type for pg_collation_dependencies
///
/// Every variant is fatal for the top-level call: nothing here is transient,
/// so callers never retry and never return partial results.
#[derive(Debug, Clone, PartialEq)]
pub enum CollDepError {
    // ============ Lookup Errors (42xxx) ============
    /// Referenced catalog object does not exist
    NotFound {
        object: String,
        id: u32,
    },

    // ============ Data Integrity Errors (XX001) ============
    /// A catalog record violates a structural invariant the resolvers rely on
    CorruptCatalog {
        object: String,
        reason: String,
    },

    // ============ Analysis Errors (0A000) ============
    /// Expression node kind the walker does not know how to interpret
    UnsupportedConstruct {
        node: String,
    },

    // ============ Resource Errors (54xxx) ============
    /// Recursion depth limit exceeded
    ResourceExhausted {
        depth: usize,
        max_depth: usize,
    },

    /// Native stack budget or expression nesting limit exceeded
    StackDepthExceeded {
        context: String,
    },

    // ============ Input Errors (22xxx) ============
    /// Invalid argument passed to an SQL-callable function
    InvalidParameter {
        parameter: String,
        value: String,
        reason: String,
    },

    // ============ System Errors (XX000) ============
    /// SPI operation failed
    SpiError {
        query: String,
        error: String,
    },
}

impl CollDepError {
    /// Get PostgreSQL SQLSTATE code for this error
    pub fn sqlstate(&self) -> &'static str {
        use CollDepError::*;
        match self {
            NotFound { .. } => "42704",             // Undefined object
            CorruptCatalog { .. } => "XX001",       // Data corrupted
            UnsupportedConstruct { .. } => "0A000", // Feature not supported
            ResourceExhausted { .. } => "54001",    // Statement too complex
            StackDepthExceeded { .. } => "54001",   // Statement too complex
            InvalidParameter { .. } => "22023",     // Invalid parameter value
            SpiError { .. } => "XX000",             // Internal error
        }
    }

    fn error_code(&self) -> PgSqlErrorCode {
        use CollDepError::*;
        match self {
            NotFound { .. } => PgSqlErrorCode::ERRCODE_UNDEFINED_OBJECT,
            CorruptCatalog { .. } => PgSqlErrorCode::ERRCODE_DATA_CORRUPTED,
            UnsupportedConstruct { .. } => PgSqlErrorCode::ERRCODE_FEATURE_NOT_SUPPORTED,
            ResourceExhausted { .. } | StackDepthExceeded { .. } => {
                PgSqlErrorCode::ERRCODE_STATEMENT_TOO_COMPLEX
            }
            InvalidParameter { .. } => PgSqlErrorCode::ERRCODE_INVALID_PARAMETER_VALUE,
            SpiError { .. } => PgSqlErrorCode::ERRCODE_INTERNAL_ERROR,
        }
    }

    pub fn not_found(object: &str, id: pgrx::pg_sys::Oid) -> Self {
        CollDepError::NotFound {
            object: object.to_string(),
            id: id.as_u32(),
        }
    }

    pub fn corrupt(object: impl Into<String>, reason: impl Into<String>) -> Self {
        CollDepError::CorruptCatalog {
            object: object.into(),
            reason: reason.into(),
        }
    }

    /// Raise this error to PostgreSQL with its SQLSTATE.
    ///
    /// Must only be called once every scoped resource of the failed call has
    /// been dropped, since control never comes back.
    pub fn raise(&self) -> ! {
        ErrorReport::new(self.error_code(), self.to_string(), "pg_collation_dependencies")
            .report(PgLogLevel::ERROR);
        unreachable!("ERROR report returned control")
    }
}

impl fmt::Display for CollDepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use CollDepError::*;
        match self {
            NotFound { object, id } => {
                write!(f, "could not find {} {}", object, id)
            }
            CorruptCatalog { object, reason } => {
                write!(f, "corrupt catalog data for {}: {}", object, reason)
            }
            UnsupportedConstruct { node } => {
                write!(f, "unexpected node type {} in expression", node)
            }
            ResourceExhausted { depth, max_depth } => {
                write!(
                    f,
                    "recursion depth {} exceeds maximum {} \
                     (see pg_collation_dependencies.max_depth)",
                    depth, max_depth
                )
            }
            StackDepthExceeded { context } => {
                write!(f, "stack depth limit exceeded while {}", context)
            }
            InvalidParameter { parameter, value, reason } => {
                write!(f, "invalid value '{}' for {}: {}", value, parameter, reason)
            }
            SpiError { query, error } => {
                let shown = query.char_indices().nth(100).map_or(query.as_str(), |(i, _)| &query[..i]);
                write!(f, "SPI query failed: {}\nQuery: {}", error, shown)
            }
        }
    }
}

impl std::error::Error for CollDepError {}

/// Result type for collation dependency resolution
pub type CollDepResult<T> = Result<T, CollDepError>;

/// Convert SpiError to CollDepError
impl From<pgrx::spi::Error> for CollDepError {
    fn from(e: pgrx::spi::Error) -> Self {
        CollDepError::SpiError {
            query: "Unknown".to_string(),
            error: e.to_string(),
        }
    }
}

/// Convert serde_json::Error to CollDepError
impl From<serde_json::Error> for CollDepError {
    fn from(e: serde_json::Error) -> Self {
        CollDepError::InvalidParameter {
            parameter: "report".to_string(),
            value: String::new(),
            reason: format!("JSON serialization error: {}", e),
        }
    }
}
