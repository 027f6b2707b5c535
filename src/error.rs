use thiserror::Error;

/// Error type for every fallible pipeline operation.
#[derive(Debug, Error)]
pub enum TaleforgeError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Requested entity was not found.
    #[error("Not found: {entity_type} with id '{id}'")]
    NotFound { entity_type: String, id: String },

    /// Input validation failed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A remote call timed out, was rate-limited, or the store was briefly
    /// unreachable. Retried with backoff.
    #[error("Transient failure in {service}: {message}")]
    TransientService { service: String, message: String },

    /// A remote call failed in a way retrying will not fix.
    #[error("{service} failed: {message}")]
    Service { service: String, message: String },

    /// The classifier could not separate the top candidates.
    #[error("Ambiguous classification: {0}")]
    AmbiguousClassification(String),

    /// Structured output did not parse against the expected schema.
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    /// Stores disagree about an entity, or a required reference could not
    /// be materialized. Fatal for that entity only.
    #[error("Consistency violation on '{entity_id}': {message}")]
    ConsistencyViolation { entity_id: String, message: String },

    /// The document skeleton could not be built.
    #[error("Document cannot be processed: {0}")]
    DocumentFatal(String),
}

impl TaleforgeError {
    /// Whether a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, TaleforgeError::TransientService { .. })
    }

    pub fn transient(service: impl Into<String>, message: impl Into<String>) -> Self {
        TaleforgeError::TransientService {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn service(service: impl Into<String>, message: impl Into<String>) -> Self {
        TaleforgeError::Service {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Short machine-readable kind, used in failure records.
    pub fn kind(&self) -> &'static str {
        match self {
            TaleforgeError::Database(_) => "database",
            TaleforgeError::NotFound { .. } => "not_found",
            TaleforgeError::Validation(_) => "validation",
            TaleforgeError::Config(_) => "config",
            TaleforgeError::TransientService { .. } => "transient_service",
            TaleforgeError::Service { .. } => "service",
            TaleforgeError::AmbiguousClassification(_) => "ambiguous_classification",
            TaleforgeError::SchemaViolation(_) => "schema_violation",
            TaleforgeError::ConsistencyViolation { .. } => "consistency_violation",
            TaleforgeError::DocumentFatal(_) => "document_fatal",
        }
    }
}

impl From<surrealdb::Error> for TaleforgeError {
    fn from(err: surrealdb::Error) -> Self {
        TaleforgeError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for TaleforgeError {
    fn from(err: serde_json::Error) -> Self {
        TaleforgeError::SchemaViolation(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for TaleforgeError {
    fn from(err: std::io::Error) -> Self {
        TaleforgeError::Database(format!("I/O error: {}", err))
    }
}

impl From<reqwest::Error> for TaleforgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            TaleforgeError::transient("http", err.to_string())
        } else {
            TaleforgeError::service("http", err.to_string())
        }
    }
}
