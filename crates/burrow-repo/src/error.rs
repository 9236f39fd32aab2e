//! Error types for repository operations

use std::error::Error;
use std::fmt;

/// Boxed error source
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Result alias for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;

/// Failure from a block store, tree, commit or CAR operation
///
/// Carries a [`RepoErrorKind`] for callers to branch on, plus optional source, context
/// and help text for diagnostics.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub struct RepoError {
    kind: RepoErrorKind,
    #[source]
    source: Option<BoxError>,
    #[help]
    help: Option<String>,
    context: Option<String>,
}

/// What went wrong, coarsely
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoErrorKind {
    /// Backend failed; retry with backoff
    Storage,
    /// Backend call exceeded its deadline
    Timeout,
    /// Tree node malformed or out of order
    InvalidMst,
    /// Commit object malformed or inconsistent with its parent
    InvalidCommit,
    /// Record key rejected
    InvalidKey,
    /// Content does not hash to its CID, or CID uses an unsupported codec
    InvalidCid,
    /// Block, record or commit absent
    NotFound,
    /// Signature or key failure
    Crypto,
    /// DAG-CBOR encode or decode failed
    Serialization,
    /// CAR stream malformed
    Car,
    /// Filesystem failure
    Io,
}

impl RepoError {
    /// Error of `kind` with an optional source
    pub fn new(kind: RepoErrorKind, source: Option<BoxError>) -> Self {
        Self {
            kind,
            source,
            help: None,
            context: None,
        }
    }

    /// Attach help text
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Attach context, printed after the kind
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// The error kind
    pub fn kind(&self) -> &RepoErrorKind {
        &self.kind
    }

    /// Backend failures, as opposed to bad input or bad stored content
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            RepoErrorKind::Storage | RepoErrorKind::Timeout | RepoErrorKind::Io
        )
    }

    /// Whether this is [`RepoErrorKind::NotFound`]
    pub fn is_not_found(&self) -> bool {
        self.kind == RepoErrorKind::NotFound
    }

    /// Backend failure
    pub fn storage(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(RepoErrorKind::Storage, Some(Box::new(source)))
    }

    /// Deadline expired on `op`
    pub fn timeout(op: &str) -> Self {
        Self::new(RepoErrorKind::Timeout, None)
            .with_context(format!("{op} did not finish in time"))
            .with_help("retry with backoff; the block store may be overloaded")
    }

    /// Malformed tree
    pub fn invalid_mst(msg: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::InvalidMst, Some(msg.into().into()))
    }

    /// Malformed or inconsistent commit
    pub fn invalid_commit(msg: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::InvalidCommit, Some(msg.into().into()))
    }

    /// Rejected record key
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::InvalidKey, None)
            .with_context(format!("record key {:?}", key.into()))
            .with_help("record keys are `collection/rkey`, up to 256 bytes of [a-zA-Z0-9._:~-]")
    }

    /// CID problem
    pub fn invalid_cid(msg: impl Into<String>) -> Self {
        Self::new(RepoErrorKind::InvalidCid, Some(msg.into().into()))
    }

    /// `what` identified by `id` is absent
    pub fn not_found(what: &str, id: impl fmt::Display) -> Self {
        Self::new(RepoErrorKind::NotFound, None).with_context(format!("{what} {id} is missing"))
    }

    /// DAG-CBOR failure
    pub fn serialization(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(RepoErrorKind::Serialization, Some(Box::new(source)))
    }

    /// CAR failure
    pub fn car(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(RepoErrorKind::Car, Some(Box::new(source)))
    }

    /// CAR input could not be parsed
    pub fn car_parse(source: impl Error + Send + Sync + 'static) -> Self {
        Self::car(source).with_context("unreadable CAR input")
    }

    /// Filesystem failure
    pub fn io(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(RepoErrorKind::Io, Some(Box::new(source)))
    }
}

impl fmt::Display for RepoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        if let Some(src) = &self.source {
            write!(f, ": {src}")?;
        }
        Ok(())
    }
}

macro_rules! backend_errors {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for RepoError {
                fn from(e: $ty) -> Self {
                    RepoError::storage(e)
                }
            }
        )*
    };
}

backend_errors!(
    redb::Error,
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

impl From<tokio::task::JoinError> for RepoError {
    fn from(e: tokio::task::JoinError) -> Self {
        RepoError::storage(e).with_context("blocking storage task was cancelled")
    }
}

/// Tree-level failures, folded into [`RepoError`] at module boundaries
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum MstError {
    /// Zero-length key
    #[error("record key is empty")]
    EmptyKey,

    /// Key over the length limit
    #[error("record key is {len} bytes, limit is {max}")]
    KeyTooLong {
        /// Length seen
        len: usize,
        /// Limit
        max: usize,
    },

    /// Key outside the allowed alphabet or shape
    #[error("record key {key:?} is not `collection/rkey`")]
    InvalidKeyChars {
        /// Offending key
        key: String,
    },

    /// Node violates layout rules
    #[error("malformed tree node: {0}")]
    InvalidNode(String),

    /// Node could not be encoded
    #[error("tree node encoding failed")]
    Serialization(#[source] BoxError),
}

impl From<MstError> for RepoError {
    fn from(e: MstError) -> Self {
        match e {
            MstError::EmptyKey => RepoError::invalid_key(""),
            MstError::KeyTooLong { len, max } => {
                RepoError::invalid_key(format!("<{len} bytes>")).with_context(format!(
                    "record key is {len} bytes, limit is {max}"
                ))
            }
            MstError::InvalidKeyChars { key } => RepoError::invalid_key(key),
            MstError::InvalidNode(msg) => RepoError::invalid_mst(msg),
            MstError::Serialization(e) => RepoError::new(RepoErrorKind::Serialization, Some(e)),
        }
    }
}

/// Commit-level failures, folded into [`RepoError`] at module boundaries
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum CommitError {
    /// Version other than 3
    #[error("commit version {0} is not supported")]
    InvalidVersion(i64),

    /// Signature bytes unparseable
    #[error("malformed signature: {0}")]
    InvalidSignature(String),

    /// Signature does not match the key
    #[error("signature does not match the signing key")]
    SignatureVerificationFailed,

    /// Public key unparseable
    #[error("malformed public key: {0}")]
    InvalidKey(String),

    /// Multicodec not one of ed25519, secp256k1, p256
    #[error("key codec 0x{0:x} is not supported")]
    UnsupportedKeyType(u64),

    /// Commit could not be encoded or decoded
    #[error("commit encoding failed")]
    Serialization(#[source] BoxError),
}

impl From<CommitError> for RepoError {
    fn from(e: CommitError) -> Self {
        match e {
            CommitError::InvalidVersion(_) => RepoError::invalid_commit(e.to_string()),
            CommitError::Serialization(src) => {
                RepoError::new(RepoErrorKind::Serialization, Some(src))
            }
            other => RepoError::new(RepoErrorKind::Crypto, Some(Box::new(other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds() {
        assert!(RepoError::timeout("get").is_transient());
        assert!(RepoError::io(std::io::Error::other("disk")).is_transient());
        assert!(!RepoError::not_found("block", "bafy").is_transient());
        assert!(RepoError::not_found("block", "bafy").is_not_found());
        assert!(!RepoError::invalid_cid("mismatch").is_transient());
    }

    #[test]
    fn display_carries_context() {
        let err = RepoError::not_found("tree node", "bafyabc");
        assert_eq!(err.to_string(), "NotFound: tree node bafyabc is missing");
    }

    #[test]
    fn signature_failures_are_crypto() {
        let err = RepoError::from(CommitError::SignatureVerificationFailed);
        assert_eq!(*err.kind(), RepoErrorKind::Crypto);
        let err = RepoError::from(CommitError::InvalidVersion(2));
        assert_eq!(*err.kind(), RepoErrorKind::InvalidCommit);
    }
}
