use std::io::ErrorKind;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a mailbox session while talking to its backend.
#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("IMAP error: {0}")]
    Imap(#[from] imap::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no such folder: {0}")]
    NoSuchFolder(String),

    #[error("no folder selected")]
    NoSelection,

    #[error("message {0} not found")]
    NoSuchMessage(u32),

    #[error("server response had no {0}")]
    MissingData(&'static str),
}

impl MailboxError {
    /// Whether the session behind this error is gone, so that no later
    /// command on it can succeed.
    pub fn is_connection_lost(&self) -> bool {
        match self {
            MailboxError::Imap(imap::Error::ConnectionLost | imap::Error::Tls(_)) => true,
            MailboxError::Imap(imap::Error::Io(e)) | MailboxError::Io(e) => is_disconnect(e),
            _ => false,
        }
    }
}

fn is_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
            | ErrorKind::TimedOut
    )
}

/// Authentication or connection failure, at login or later. Fatal for the
/// whole run.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to connect to {server}: {reason}")]
    Connect { server: String, reason: String },

    #[error("login failed for {user}: {reason}")]
    Authentication { user: String, reason: String },

    #[error("connection lost while reading {folder}: {reason}")]
    ConnectionLost { folder: String, reason: String },
}

impl SessionError {
    pub(crate) fn lost(folder: &str, source: &MailboxError) -> Self {
        SessionError::ConnectionLost {
            folder: folder.to_string(),
            reason: source.to_string(),
        }
    }
}

/// A folder could not be selected or searched. The folder is skipped.
#[derive(Debug, Error)]
#[error("cannot access folder {folder}: {source}")]
pub struct FolderAccessError {
    pub folder: String,
    #[source]
    pub source: MailboxError,
}

/// A single message body or its flags could not be retrieved.
#[derive(Debug, Error)]
#[error("cannot fetch message {seq} in {folder}: {source}")]
pub struct MessageFetchError {
    pub folder: String,
    pub seq: u32,
    #[source]
    pub source: MailboxError,
}

/// A retrieved blob could not be turned into a message record.
#[derive(Debug, Error)]
#[error("cannot parse message {seq} in {folder}: {reason}")]
pub struct MessageParseError {
    pub folder: String,
    pub seq: u32,
    pub reason: String,
}

/// The thread document could not be written.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode threads: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to move document into place: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Anything that makes a whole fetch-to-store run fail.
#[derive(Debug, Error)]
pub enum ThreadingError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("failed to start fetch workers: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),
}
