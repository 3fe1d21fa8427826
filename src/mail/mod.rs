mod error;
mod fetch;
mod imap_session;
mod maildir;
mod normalize;
mod session;
mod store;
mod threading;
mod types;

pub use error::{
    FolderAccessError, MailboxError, MessageFetchError, MessageParseError, SerializationError,
    SessionError, ThreadingError,
};
pub use fetch::{FolderGroup, fetch_folders, quote_folder_name, unquote_folder_name};
pub use imap_session::{ImapConnector, ImapSession};
pub use maildir::{MaildirConnector, MaildirSession};
pub use normalize::{decode_header_value, normalize_message, strip_quoted_reply};
pub use session::{Connector, Credentials, MailSession};
pub use store::{load_threads, save_threads};
pub use threading::{ThreadGraph, assemble_threads, build_threads};
pub use types::{MessageRecord, RawMessage, ThreadRecord};
