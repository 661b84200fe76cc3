use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum StoreError {
    /// The message is still receiving increments and must be finalized first.
    StreamingMessage { message_id: String },
    /// A statement failed.
    Sqlite {
        operation: &'static str,
        source: rusqlite::Error,
    },
    /// The backing file could not be removed or its directory created.
    Io { path: PathBuf, source: std::io::Error },
    /// A stored row could not be turned back into a thread or message.
    Corrupt { detail: String },
}

impl StoreError {
    pub(crate) fn sqlite(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| StoreError::Sqlite { operation, source }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::StreamingMessage { message_id } => {
                write!(f, "Refusing to persist message {message_id} while it is streaming")
            }
            StoreError::Sqlite { operation, source } => {
                write!(f, "Store operation '{operation}' failed: {source}")
            }
            StoreError::Io { path, source } => {
                write!(f, "Store file {} is unusable: {}", path.display(), source)
            }
            StoreError::Corrupt { detail } => write!(f, "Stored data is corrupt: {detail}"),
        }
    }
}

impl StdError for StoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            StoreError::Sqlite { source, .. } => Some(source),
            StoreError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
