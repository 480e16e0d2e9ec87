//! Errors surfaced to the host by the key/value activity.

/// A specialized `Result` for activity operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every way an invocation can fail.
///
/// An invocation either completes one operation and sets its output, or returns one of these and
/// leaves the output untouched.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An input slot was missing or held a value of the wrong type.
    #[error("invalid input `{slot}`: {reason}")]
    InvalidInput {
        /// The name of the offending input slot.
        slot: &'static str,
        /// What was wrong with it.
        reason: String,
    },
    /// The method is not one of `Insert`, `Upsert`, `Remove` or `Get`.
    #[error("method {0} not recognized")]
    UnsupportedMethod(String),
    /// The cluster could not be reached or its address is malformed.
    #[error("connection to `{server}` failed: {reason}")]
    Connection {
        /// The server address as given by the host.
        server: String,
        /// Why the connection failed.
        reason: String,
    },
    /// The cluster rejected the username or password.
    #[error("authentication failed for user `{username}`")]
    Authentication {
        /// The user that failed to authenticate.
        username: String,
    },
    /// The bucket does not exist or its password was rejected.
    #[error("bucket `{bucket}` could not be opened: {reason}")]
    BucketOpen {
        /// The bucket name.
        bucket: String,
        /// Why the bucket could not be opened.
        reason: String,
    },
    /// An insert targeted a key that already holds a document.
    #[error("document `{key}` already exists")]
    DuplicateKey {
        /// The existing key.
        key: String,
    },
    /// The key holds no document.
    #[error("document `{key}` not found")]
    NotFound {
        /// The missing key.
        key: String,
    },
    /// The serialized document exceeds the per-document size limit.
    #[error("document `{key}` is {size} bytes, which exceeds the size limit")]
    ValueTooLarge {
        /// The key being written.
        key: String,
        /// The serialized size in bytes.
        size: usize,
    },
    /// The storage engine failed.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    /// A document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The blocking task running the invocation did not complete.
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// A coarse classification of [`Error`], for hosts that route failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request itself is wrong; retrying it unchanged will fail again.
    InvalidRequest,
    /// The cluster, credentials or bucket could not be used.
    Unavailable,
    /// The operation was refused because of the document's current state.
    Conflict,
    /// The document does not exist.
    NotFound,
    /// Anything else.
    Internal,
}

impl Error {
    /// Classify this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput { .. } | Self::UnsupportedMethod(_) | Self::ValueTooLarge { .. } => {
                ErrorKind::InvalidRequest
            }
            Self::Connection { .. } | Self::Authentication { .. } | Self::BucketOpen { .. } => {
                ErrorKind::Unavailable
            }
            Self::DuplicateKey { .. } => ErrorKind::Conflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Storage(_) | Self::Serialization(_) | Self::Runtime(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for [`Error::InvalidInput`].
    pub(crate) fn invalid_input(slot: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            slot,
            reason: reason.into(),
        }
    }
}
