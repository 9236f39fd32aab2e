//! Server error taxonomy and its HTTP rendering

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use burrow_repo::error::{RepoError, RepoErrorKind};
use smol_str::SmolStr;

use crate::status::RepoStatus;

/// Result alias for server operations
pub type Result<T> = std::result::Result<T, PdsError>;

/// Everything a server operation can fail with
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum PdsError {
    /// Repository, blob or record does not exist
    #[error("{message}")]
    #[diagnostic(code(burrow::not_found))]
    NotFound {
        /// XRPC error name, e.g. `RepoNotFound`
        name: &'static str,
        /// Human readable detail
        message: String,
    },

    /// The caller's view of the repository head is out of date
    #[error("expected head {expected}, repository is at {actual}")]
    #[diagnostic(
        code(burrow::stale_revision),
        help("reload the repository head and retry the write")
    )]
    StaleRevision {
        /// Head the caller built on
        expected: String,
        /// Current head
        actual: String,
    },

    /// The repository's signing key is missing or unusable
    #[error("cannot sign for {did}: {reason}")]
    #[diagnostic(code(burrow::signing))]
    Signing {
        /// Repository DID
        did: String,
        /// What went wrong
        reason: String,
    },

    /// The repository exists but is not serving data
    #[error("repository {did} is {status}")]
    #[diagnostic(code(burrow::repo_unavailable))]
    RepoUnavailable {
        /// Repository DID
        did: String,
        /// Current status
        status: RepoStatus,
    },

    /// Malformed or disallowed request
    #[error("{message}")]
    #[diagnostic(code(burrow::input))]
    Input {
        /// XRPC error name
        name: SmolStr,
        /// Human readable detail
        message: String,
    },

    /// Backend failure
    #[error("storage error")]
    #[diagnostic(code(burrow::storage))]
    Storage(#[source] RepoError),
}

impl PdsError {
    /// Input error shorthand
    pub fn input(name: impl Into<SmolStr>, message: impl Into<String>) -> Self {
        PdsError::Input {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Missing repository
    pub fn repo_not_found(did: impl std::fmt::Display) -> Self {
        PdsError::NotFound {
            name: "RepoNotFound",
            message: format!("could not find repo for DID: {did}"),
        }
    }

    /// Missing blob
    pub fn blob_not_found(cid: impl std::fmt::Display) -> Self {
        PdsError::NotFound {
            name: "BlobNotFound",
            message: format!("blob not found: {cid}"),
        }
    }

    /// Backend failure that is not a [`RepoError`] already
    pub fn storage(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        PdsError::Storage(RepoError::storage(source))
    }

    /// Safe to retry as-is, after a backoff
    pub fn is_retryable(&self) -> bool {
        match self {
            PdsError::Storage(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Retrying needs fresh state first
    pub fn needs_refresh(&self) -> bool {
        matches!(self, PdsError::StaleRevision { .. })
    }

    /// XRPC-style error name
    pub fn error_name(&self) -> &str {
        match self {
            PdsError::NotFound { name, .. } => name,
            PdsError::StaleRevision { .. } => "InvalidSwap",
            PdsError::Signing { .. } => "SigningError",
            PdsError::RepoUnavailable { status, .. } => match status {
                RepoStatus::Deactivated => "RepoDeactivated",
                RepoStatus::Takendown => "RepoTakendown",
                RepoStatus::Deleted => "RepoDeleted",
                RepoStatus::Active => "RepoUnavailable",
            },
            PdsError::Input { name, .. } => name,
            PdsError::Storage(_) => "InternalServerError",
        }
    }

    /// Status code for the HTTP surface
    pub fn status_code(&self) -> StatusCode {
        match self {
            PdsError::NotFound { .. } => StatusCode::NOT_FOUND,
            PdsError::StaleRevision { .. } => StatusCode::CONFLICT,
            PdsError::Signing { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            PdsError::RepoUnavailable { .. } | PdsError::Input { .. } => StatusCode::BAD_REQUEST,
            PdsError::Storage(_) if self.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            PdsError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Restate a status error as an input error, as the listing endpoints report them
    pub(crate) fn into_input(self) -> Self {
        match self {
            PdsError::RepoUnavailable { .. } | PdsError::NotFound { .. } => PdsError::Input {
                name: SmolStr::new(self.error_name()),
                message: self.to_string(),
            },
            other => other,
        }
    }
}

impl From<RepoError> for PdsError {
    fn from(e: RepoError) -> Self {
        match e.kind() {
            RepoErrorKind::NotFound => PdsError::NotFound {
                name: "NotFound",
                message: e.to_string(),
            },
            RepoErrorKind::InvalidKey
            | RepoErrorKind::InvalidCid
            | RepoErrorKind::Serialization
            | RepoErrorKind::Car => PdsError::input("InvalidRequest", e.to_string()),
            _ => PdsError::Storage(e),
        }
    }
}

macro_rules! storage_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for PdsError {
                fn from(e: $ty) -> Self {
                    PdsError::Storage(RepoError::from(e))
                }
            }
        )*
    };
}

storage_from!(
    redb::Error,
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
    tokio::task::JoinError,
);

impl From<std::io::Error> for PdsError {
    fn from(e: std::io::Error) -> Self {
        PdsError::Storage(RepoError::io(e))
    }
}

impl From<QueryRejection> for PdsError {
    fn from(e: QueryRejection) -> Self {
        PdsError::input("InvalidRequest", e.body_text())
    }
}

/// Wire shape of an error response
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ErrorBody {
    /// XRPC error name
    pub error: String,
    /// Human readable detail
    pub message: String,
}

impl IntoResponse for PdsError {
    fn into_response(self) -> Response {
        let message = match &self {
            PdsError::Storage(source) => {
                tracing::error!(error = %source, "storage failure");
                "internal storage error".to_string()
            }
            PdsError::Signing { .. } => {
                tracing::error!(error = %self, "signing failure");
                "repository signing failed".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorBody {
            error: self.error_name().to_string(),
            message,
        };
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_and_refresh_classification() {
        assert!(PdsError::Storage(RepoError::timeout("get")).is_retryable());
        assert!(!PdsError::Storage(RepoError::invalid_mst("bad")).is_retryable());

        let stale = PdsError::StaleRevision {
            expected: "a".into(),
            actual: "b".into(),
        };
        assert!(stale.needs_refresh());
        assert!(!stale.is_retryable());
        assert!(!PdsError::repo_not_found("did:plc:x").needs_refresh());
    }

    #[test]
    fn status_errors_become_input_errors() {
        let err = PdsError::RepoUnavailable {
            did: "did:plc:x".into(),
            status: RepoStatus::Takendown,
        }
        .into_input();
        assert!(matches!(err, PdsError::Input { .. }));
        assert_eq!(err.error_name(), "RepoTakendown");

        let err = PdsError::repo_not_found("did:plc:x").into_input();
        assert_eq!(err.error_name(), "RepoNotFound");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn repo_errors_map_by_kind() {
        let err: PdsError = RepoError::not_found("block", "bafy").into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err: PdsError = RepoError::invalid_key("bad key").into();
        assert_eq!(err.error_name(), "InvalidRequest");

        let err: PdsError = RepoError::timeout("put").into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
