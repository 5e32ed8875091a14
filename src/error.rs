//! Defines the app level error type and its conversion into JSON error responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The request was well-formed JSON but a field failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A role string was not recognised, or the role is not allowed for the
    /// operation (e.g., proposing `owner` for a group member).
    #[error("\"{0}\" is not a valid role for this operation")]
    InvalidRole(String),

    /// An empty string was used to create a tag name.
    #[error("tag name cannot be empty")]
    EmptyTagName,

    /// A tag name exceeded the maximum length.
    #[error("tag name is longer than 255 characters")]
    TagNameTooLong,

    /// The user provided an invalid combination of username and password.
    ///
    /// Unknown usernames map to this error too so that clients cannot probe
    /// for registered usernames.
    #[error("invalid username or password")]
    InvalidCredentials,

    /// The bearer token was missing, malformed, expired, or its session has
    /// ended.
    #[error("missing, invalid or expired token")]
    Unauthenticated,

    /// The principal lacks the role required on the target scope.
    #[error("you do not have permission to perform this action")]
    Forbidden,

    /// The requested resource was not found.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// A uniqueness constraint was violated.
    #[error("{0} already exists")]
    Conflict(String),

    /// An unhandled/unexpected SQL error, tagged with the operation that
    /// failed.
    #[error("store operation \"{operation}\" failed: {source}")]
    Store {
        /// A short name for the operation, e.g. "upsert membership".
        operation: &'static str,
        /// The underlying driver error.
        source: rusqlite::Error,
    },

    /// A connection could not be checked out of the database pool.
    #[error("could not get a database connection: {0}")]
    Pool(String),

    /// The key-value session store failed.
    #[error("session store error: {0}")]
    SessionStore(String),

    /// An unexpected error occurred with the underlying hashing library.
    ///
    /// The error string should only be logged for debugging on the server.
    #[error("hashing failed: {0}")]
    HashingError(String),

    /// A bearer token could not be signed.
    #[error("could not create token: {0}")]
    TokenCreation(String),

    /// Catch-all for failures that are not the client's fault.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        map_store_error("query", value)
    }
}

/// Attach an operation name to store errors.
pub trait StoreContext<T> {
    /// Convert a `rusqlite` result into a crate result, recording `operation`
    /// for errors that are not uniqueness violations or missing rows.
    fn store_context(self, operation: &'static str) -> Result<T, Error>;
}

impl<T> StoreContext<T> for Result<T, rusqlite::Error> {
    fn store_context(self, operation: &'static str) -> Result<T, Error> {
        self.map_err(|error| map_store_error(operation, error))
    }
}

fn map_store_error(operation: &'static str, error: rusqlite::Error) -> Error {
    match error {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: _,
                extended_code:
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY,
            },
            _,
        ) => Error::Conflict("a matching record".to_owned()),
        rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
        error => {
            tracing::error!("store operation \"{operation}\" failed: {error}");
            Error::Store {
                operation,
                source: error,
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::InvalidInput(_)
            | Error::InvalidRole(_)
            | Error::EmptyTagName
            | Error::TagNameTooLong => StatusCode::BAD_REQUEST,
            Error::InvalidCredentials | Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Store { .. }
            | Error::Pool(_)
            | Error::SessionStore(_)
            | Error::HashingError(_)
            | Error::TokenCreation(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Any errors that are not handled above are not intended to be shown to the client.
            tracing::error!("An unexpected error occurred: {self}");
            "internal server error".to_owned()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
