//! Error types for the veneer data API gateway.
//!
//! Every failure in the engine carries a wire sub-code plus an HTTP status.
//! Errors cross crate boundaries as [`VeneerError`]; the REST and GraphQL
//! surfaces serialize them with [`VeneerError::to_rest_body`] and
//! [`VeneerError::to_graphql_extensions`].
//!
//! # Error Hierarchy
//!
//! ```text
//! VeneerError
//! ├── BadRequest            - syntactic failure in query, filter, body
//! ├── Authentication        - token missing/invalid
//! ├── Authorization         - role/action/field denied
//! ├── NotFound              - no row matches PK (+ auth predicate)
//! ├── Conflict              - unique constraint on insert
//! ├── Database              - query executed, DB returned error
//! ├── ServiceBusy           - back-pressure semaphore exhaustion
//! ├── Initialization        - config invalid / metadata unavailable
//! └── Internal              - driver exception not otherwise classified
//! ```

use thiserror::Error;

/// Result type alias for veneer operations.
pub type Result<T> = std::result::Result<T, VeneerError>;

/// Wire sub-code carried in every error response.
///
/// REST responses embed it as `error.code`; GraphQL responses carry it in
/// `extensions.code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubCode {
    /// Syntactic failure in query, filter, or body.
    BadRequest,
    /// Token missing or invalid.
    AuthenticationFailed,
    /// Role, action, or field denied.
    AuthorizationFailed,
    /// No row matches the primary key (plus auth predicate).
    EntityNotFound,
    /// Unique constraint violation on insert.
    ItemAlreadyExists,
    /// Driver exception not otherwise classified.
    UnexpectedError,
    /// Query executed and the database returned an error.
    DatabaseOperationFailed,
    /// Back-pressure semaphore exhaustion.
    ServiceBusy,
    /// Config invalid or metadata unavailable.
    ErrorInInitialization,
}

impl SubCode {
    /// Wire spelling of the sub-code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "BadRequest",
            Self::AuthenticationFailed => "AuthenticationFailed",
            Self::AuthorizationFailed => "AuthorizationFailed",
            Self::EntityNotFound => "EntityNotFound",
            Self::ItemAlreadyExists => "ItemAlreadyExists",
            Self::UnexpectedError => "UnexpectedError",
            Self::DatabaseOperationFailed => "DatabaseOperationFailed",
            Self::ServiceBusy => "ServiceBusy",
            Self::ErrorInInitialization => "ErrorInInitialization",
        }
    }

    /// HTTP status carried alongside the sub-code.
    #[must_use]
    pub const fn status(self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::AuthenticationFailed => 401,
            Self::AuthorizationFailed => 403,
            Self::EntityNotFound => 404,
            Self::ItemAlreadyExists => 409,
            Self::UnexpectedError | Self::DatabaseOperationFailed => 500,
            Self::ServiceBusy | Self::ErrorInInitialization => 503,
        }
    }
}

/// Main error type for veneer operations.
///
/// Planner and executor errors are caught at the per-request boundary and
/// mapped through [`VeneerError::to_rest_body`] or
/// [`VeneerError::to_graphql_extensions`]; the response shaper never sees
/// them.
#[derive(Error, Debug)]
pub enum VeneerError {
    /// Syntactic failure in a query, filter, or request body.
    #[error("{message}")]
    BadRequest {
        /// Description of the malformed input.
        message: String,
    },

    /// Authentication failure (token missing or invalid).
    #[error("Authentication failed: {message}")]
    Authentication {
        /// Error message.
        message: String,
    },

    /// Authorization failure (role, action, or field denied).
    #[error("Authorization failed: {message}")]
    Authorization {
        /// Error message naming nothing beyond what the caller supplied.
        message: String,
    },

    /// No row matched the primary key plus the authorization predicate.
    #[error("{entity} not found")]
    NotFound {
        /// Entity the lookup ran against.
        entity: String,
    },

    /// Unique-constraint violation on insert or upsert.
    #[error("An item with the same key already exists in {entity}")]
    Conflict {
        /// Entity the write ran against.
        entity: String,
    },

    /// The query executed and the database returned an error.
    #[error("Database operation failed: {message}")]
    Database {
        /// Error message from the database.
        message:   String,
        /// SQLSTATE code if available (e.g., "23505" for unique violation).
        sql_state: Option<String>,
    },

    /// The back-pressure semaphore could not be acquired within the deadline.
    #[error("Service busy: {message}")]
    ServiceBusy {
        /// Error message.
        message: String,
    },

    /// Configuration is invalid or metadata is unavailable.
    #[error("Initialization error: {message}")]
    Initialization {
        /// Error message, possibly a collected list of violations.
        message: String,
    },

    /// Unexpected internal error. Should be rare.
    #[error("Unexpected error: {message}")]
    Internal {
        /// Error message.
        message: String,
        /// Optional source error for debugging.
        #[source]
        source:  Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl VeneerError {
    // ========================================================================
    // Constructor helpers
    // ========================================================================

    /// Create a bad-request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Create an authentication error.
    #[must_use]
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create an authorization error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Authorization {
            message: message.into(),
        }
    }

    /// Create a not-found error.
    #[must_use]
    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
        }
    }

    /// Create a conflict error.
    #[must_use]
    pub fn conflict(entity: impl Into<String>) -> Self {
        Self::Conflict {
            entity: entity.into(),
        }
    }

    /// Create a database error.
    #[must_use]
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message:   message.into(),
            sql_state: None,
        }
    }

    /// Create a database error with a SQLSTATE code.
    #[must_use]
    pub fn database_with_state(message: impl Into<String>, sql_state: impl Into<String>) -> Self {
        Self::Database {
            message:   message.into(),
            sql_state: Some(sql_state.into()),
        }
    }

    /// Create a service-busy error.
    #[must_use]
    pub fn busy(message: impl Into<String>) -> Self {
        Self::ServiceBusy {
            message: message.into(),
        }
    }

    /// Create an initialization error.
    #[must_use]
    pub fn init(message: impl Into<String>) -> Self {
        Self::Initialization {
            message: message.into(),
        }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source:  None,
        }
    }

    // ========================================================================
    // Classification
    // ========================================================================

    /// Wire sub-code for this error.
    #[must_use]
    pub const fn sub_code(&self) -> SubCode {
        match self {
            Self::BadRequest { .. } => SubCode::BadRequest,
            Self::Authentication { .. } => SubCode::AuthenticationFailed,
            Self::Authorization { .. } => SubCode::AuthorizationFailed,
            Self::NotFound { .. } => SubCode::EntityNotFound,
            Self::Conflict { .. } => SubCode::ItemAlreadyExists,
            Self::Database { .. } => SubCode::DatabaseOperationFailed,
            Self::ServiceBusy { .. } => SubCode::ServiceBusy,
            Self::Initialization { .. } => SubCode::ErrorInInitialization,
            Self::Internal { .. } => SubCode::UnexpectedError,
        }
    }

    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.sub_code().status()
    }

    /// Check if this is a client error (4xx).
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        self.status() < 500
    }

    /// Replace driver-originated text with generic text.
    ///
    /// Called at the request boundary when the host runs in production
    /// mode; driver error text is never echoed to clients there.
    #[must_use]
    pub fn sanitized(self) -> Self {
        match self {
            Self::Database { sql_state, .. } => Self::Database {
                message: "While processing your request the database ran into an error."
                    .to_string(),
                sql_state,
            },
            Self::Internal { .. } => Self::internal(
                "An unexpected error occurred while processing the request.",
            ),
            other => other,
        }
    }

    // ========================================================================
    // Wire formats
    // ========================================================================

    /// REST error envelope: `{"error": {"code", "status", "message"}}`.
    #[must_use]
    pub fn to_rest_body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "code": self.sub_code().as_str(),
                "status": self.status(),
                "message": self.to_string(),
            }
        })
    }

    /// GraphQL `extensions` object: `{"code", "status"}`.
    #[must_use]
    pub fn to_graphql_extensions(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.sub_code().as_str(),
            "status": self.status(),
        })
    }
}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for VeneerError {
    fn from(e: serde_json::Error) -> Self {
        Self::BadRequest {
            message: format!("Malformed JSON at line {}, column {}: {e}", e.line(), e.column()),
        }
    }
}

impl From<std::io::Error> for VeneerError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal {
            message: format!("I/O error: {e}"),
            source:  Some(Box::new(e)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_codes_map_to_documented_statuses() {
        assert_eq!(SubCode::BadRequest.status(), 400);
        assert_eq!(SubCode::AuthenticationFailed.status(), 401);
        assert_eq!(SubCode::AuthorizationFailed.status(), 403);
        assert_eq!(SubCode::EntityNotFound.status(), 404);
        assert_eq!(SubCode::ItemAlreadyExists.status(), 409);
        assert_eq!(SubCode::UnexpectedError.status(), 500);
        assert_eq!(SubCode::DatabaseOperationFailed.status(), 500);
        assert_eq!(SubCode::ServiceBusy.status(), 503);
        assert_eq!(SubCode::ErrorInInitialization.status(), 503);
    }

    #[test]
    fn not_found_message_names_entity_only() {
        let err = VeneerError::not_found("Book");
        assert_eq!(err.to_string(), "Book not found");
        assert_eq!(err.status(), 404);
        assert!(err.is_client_error());
    }

    #[test]
    fn rest_body_shape() {
        let err = VeneerError::forbidden("field 'ssn' not permitted");
        let body = err.to_rest_body();
        assert_eq!(body["error"]["code"], "AuthorizationFailed");
        assert_eq!(body["error"]["status"], 403);
        assert!(
            body["error"]["message"]
                .as_str()
                .is_some_and(|m| m.contains("ssn"))
        );
    }

    #[test]
    fn graphql_extensions_shape() {
        let err = VeneerError::busy("no command slots");
        let ext = err.to_graphql_extensions();
        assert_eq!(ext["code"], "ServiceBusy");
        assert_eq!(ext["status"], 503);
    }

    #[test]
    fn sanitized_strips_driver_text() {
        let err = VeneerError::database_with_state("relation \"books\" does not exist", "42P01");
        let clean = err.sanitized();
        match clean {
            VeneerError::Database { message, sql_state } => {
                assert!(!message.contains("books"));
                assert_eq!(sql_state.as_deref(), Some("42P01"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn sanitized_keeps_client_errors() {
        let err = VeneerError::bad_request("$filter has unbalanced parentheses").sanitized();
        assert!(err.to_string().contains("parentheses"));
    }

    #[test]
    fn json_error_is_bad_request() {
        let json_err =
            serde_json::from_str::<serde_json::Value>("not json").expect_err("invalid JSON");
        let err: VeneerError = json_err.into();
        assert_eq!(err.sub_code(), SubCode::BadRequest);
    }
}
