use chrono::NaiveDate;

use super::error::{MailboxError, SessionError};

/// Login for a mailbox account
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// A logged-in mailbox connection.
///
/// Sessions are stateful the way IMAP is: `select` chooses the folder that
/// subsequent fetches address. Every fetch worker owns its own session, so
/// implementations never need internal locking.
pub trait MailSession: Send {
    /// Select `folder` read-only and return the sequence numbers of the
    /// messages received on or after `since` (all messages when `None`).
    fn select(&mut self, folder: &str, since: Option<NaiveDate>)
    -> Result<Vec<u32>, MailboxError>;

    /// Full raw message for a sequence number in the selected folder
    fn fetch_body(&mut self, seq: u32) -> Result<Vec<u8>, MailboxError>;

    fn fetch_flags(&mut self, seq: u32) -> Result<Vec<String>, MailboxError>;

    fn logout(&mut self) {}
}

/// Opens sessions against one account.
pub trait Connector: Sync {
    type Session: MailSession;

    fn connect(&self) -> Result<Self::Session, SessionError>;
}
