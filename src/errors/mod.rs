//! Error handling module for the Pinmap backend.
//!
//! Each subsystem has its own error type. `AppError` maps all of them to HTTP
//! status codes and the JSON error envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Error codes as constants to avoid stringly-typed errors.
pub mod codes {
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
    pub const CONSTRAINT_VIOLATION: &str = "CONSTRAINT_VIOLATION";
    pub const STORAGE_UNAVAILABLE: &str = "STORAGE_UNAVAILABLE";
    pub const UPGRADE_BLOCKED: &str = "UPGRADE_BLOCKED";
    pub const VERSION_CONFLICT: &str = "VERSION_CONFLICT";
    pub const READ_ERROR: &str = "READ_ERROR";
    pub const WRITE_ERROR: &str = "WRITE_ERROR";
    pub const NETWORK_UNAVAILABLE: &str = "NETWORK_UNAVAILABLE";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

// ==================== RECORD STORE ====================

/// Failures of the record store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The SQLite file or its directory could not be opened.
    StorageUnavailable(String),
    /// Another connection holds the database while a migration needs it.
    UpgradeBlocked(String),
    /// The requested schema version is older than the persisted one.
    VersionConflict { requested: i64, current: i64 },
    ReadError(String),
    /// `constraint` is set when a CHECK / NOT NULL / UNIQUE rule rejected the row.
    WriteError { message: String, constraint: bool },
}

impl StoreError {
    /// Classify a failed read.
    pub fn read(err: sqlx::Error) -> Self {
        tracing::error!("Store read error: {:?}", err);
        StoreError::ReadError(err.to_string())
    }

    /// Classify a failed write, separating constraint violations from I/O.
    pub fn write(err: sqlx::Error) -> Self {
        tracing::error!("Store write error: {:?}", err);
        let constraint = err
            .as_database_error()
            .map(|db| {
                matches!(
                    db.kind(),
                    sqlx::error::ErrorKind::CheckViolation
                        | sqlx::error::ErrorKind::NotNullViolation
                        | sqlx::error::ErrorKind::UniqueViolation
                )
            })
            .unwrap_or(false);
        StoreError::WriteError {
            message: err.to_string(),
            constraint,
        }
    }

    /// Classify a failure while opening or migrating the store.
    pub fn open(err: sqlx::Error) -> Self {
        if is_busy(&err) {
            tracing::warn!("Store upgrade blocked: {}", err);
            StoreError::UpgradeBlocked(err.to_string())
        } else {
            tracing::error!("Store unavailable: {:?}", err);
            StoreError::StorageUnavailable(err.to_string())
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            StoreError::StorageUnavailable(_) => codes::STORAGE_UNAVAILABLE,
            StoreError::UpgradeBlocked(_) => codes::UPGRADE_BLOCKED,
            StoreError::VersionConflict { .. } => codes::VERSION_CONFLICT,
            StoreError::ReadError(_) => codes::READ_ERROR,
            StoreError::WriteError {
                constraint: true, ..
            } => codes::CONSTRAINT_VIOLATION,
            StoreError::WriteError { .. } => codes::WRITE_ERROR,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            StoreError::StorageUnavailable(_) | StoreError::UpgradeBlocked(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            StoreError::VersionConflict { .. } => StatusCode::CONFLICT,
            StoreError::ReadError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StoreError::WriteError {
                constraint: true, ..
            } => StatusCode::UNPROCESSABLE_ENTITY,
            StoreError::WriteError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// SQLITE_BUSY (5) and SQLITE_LOCKED (6), including their extended codes.
fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| matches!(code & 0xff, 5 | 6))
            .unwrap_or(false),
        _ => false,
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::StorageUnavailable(msg) => write!(f, "storage unavailable: {}", msg),
            StoreError::UpgradeBlocked(msg) => write!(f, "upgrade blocked: {}", msg),
            StoreError::VersionConflict { requested, current } => write!(
                f,
                "requested schema version {} is older than stored version {}",
                requested, current
            ),
            StoreError::ReadError(msg) => write!(f, "read error: {}", msg),
            StoreError::WriteError { message, .. } => write!(f, "write error: {}", message),
        }
    }
}

impl std::error::Error for StoreError {}

// ==================== REPOSITORY ====================

/// The repository operation that failed, used for the user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryAction {
    Save,
    Delete,
    Load,
}

/// A store error tagged with a message suitable for a UI notification.
#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryError {
    pub action: RepositoryAction,
    pub source: StoreError,
}

impl RepositoryError {
    pub fn new(action: RepositoryAction, source: StoreError) -> Self {
        Self { action, source }
    }

    pub fn user_message(&self) -> &'static str {
        match self.action {
            RepositoryAction::Save => "Failed to save location",
            RepositoryAction::Delete => "Failed to delete location",
            RepositoryAction::Load => "Failed to load locations",
        }
    }
}

impl std::fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.user_message(), self.source)
    }
}

impl std::error::Error for RepositoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

// ==================== NETWORK / CACHE ====================

/// Failures of an outbound fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchError {
    InvalidUrl(String),
    /// Neither the network nor a cached copy could answer the request.
    NetworkUnavailable(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::InvalidUrl(msg) => write!(f, "invalid url: {}", msg),
            FetchError::NetworkUnavailable(msg) => write!(f, "network unavailable: {}", msg),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        tracing::debug!("Network error: {:?}", err);
        if err.is_builder() {
            FetchError::InvalidUrl(err.to_string())
        } else {
            FetchError::NetworkUnavailable(err.to_string())
        }
    }
}

/// Failures of the cache manager.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheError {
    Storage(String),
    /// A manifest asset could not be cached. Reported, never propagated.
    AssetFetchFailed { url: String, reason: String },
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Storage(msg) => write!(f, "cache storage error: {}", msg),
            CacheError::AssetFetchFailed { url, reason } => {
                write!(f, "failed to cache asset {}: {}", url, reason)
            }
        }
    }
}

impl std::error::Error for CacheError {}

impl From<sqlx::Error> for CacheError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Cache storage error: {:?}", err);
        CacheError::Storage(err.to_string())
    }
}

// ==================== HTTP ====================

/// Application error type returned by HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    /// A repository failure carrying its user-facing message
    Repository(RepositoryError),
    /// No network and no cached copy
    Network(FetchError),
    Internal(String),
}

impl AppError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Repository(err) => err.source.status_code(),
            AppError::Network(FetchError::InvalidUrl(_)) => StatusCode::BAD_REQUEST,
            AppError::Network(FetchError::NetworkUnavailable(_)) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => codes::NOT_FOUND,
            AppError::BadRequest(_) => codes::BAD_REQUEST,
            AppError::Repository(err) => err.source.error_code(),
            AppError::Network(FetchError::InvalidUrl(_)) => codes::BAD_REQUEST,
            AppError::Network(FetchError::NetworkUnavailable(_)) => codes::NETWORK_UNAVAILABLE,
            AppError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> String {
        match self {
            AppError::NotFound(msg) => msg.clone(),
            AppError::BadRequest(msg) => msg.clone(),
            AppError::Repository(err) => err.user_message().to_string(),
            AppError::Network(err) => err.to_string(),
            AppError::Internal(msg) => msg.clone(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message())
    }
}

impl std::error::Error for AppError {}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        AppError::Repository(err)
    }
}

impl From<FetchError> for AppError {
    fn from(err: FetchError) -> Self {
        AppError::Network(err)
    }
}

/// Error details in the response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Error response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetails,
}

impl ErrorResponse {
    pub fn new(error: &AppError) -> Self {
        let details = match error {
            AppError::Repository(err) => Some(serde_json::json!({ "cause": err.source.to_string() })),
            _ => None,
        };

        Self {
            success: false,
            error: ErrorDetails {
                code: error.error_code().to_string(),
                message: error.message(),
                details,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse::new(&self);
        (status, Json(body)).into_response()
    }
}
