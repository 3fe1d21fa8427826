use std::net::TcpStream;

use chrono::NaiveDate;
use native_tls::{TlsConnector, TlsStream};

use super::error::{MailboxError, SessionError};
use super::fetch::unquote_folder_name;
use super::session::{Connector, Credentials, MailSession};

/// Connects to an IMAP server over TLS and logs in.
pub struct ImapConnector {
    pub server: String,
    pub port: u16,
    pub credentials: Credentials,
}

impl ImapConnector {
    pub fn new(server: impl Into<String>, port: u16, credentials: Credentials) -> Self {
        Self {
            server: server.into(),
            port,
            credentials,
        }
    }
}

impl Connector for ImapConnector {
    type Session = ImapSession;

    fn connect(&self) -> Result<ImapSession, SessionError> {
        let connect_error = |reason: String| SessionError::Connect {
            server: format!("{}:{}", self.server, self.port),
            reason,
        };

        let tls = TlsConnector::builder()
            .build()
            .map_err(|e| connect_error(e.to_string()))?;
        let client = imap::connect((self.server.as_str(), self.port), &self.server, &tls)
            .map_err(|e| connect_error(e.to_string()))?;

        let session = client
            .login(&self.credentials.username, &self.credentials.password)
            .map_err(|(e, _)| SessionError::Authentication {
                user: self.credentials.username.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!(server = %self.server, user = %self.credentials.username, "IMAP login ok");
        Ok(ImapSession { session })
    }
}

pub struct ImapSession {
    session: imap::Session<TlsStream<TcpStream>>,
}

/// IMAP search criteria for an optional cutoff date
fn search_criteria(since: Option<NaiveDate>) -> String {
    match since {
        Some(date) => format!("SINCE {}", date.format("%d-%b-%Y")),
        None => "ALL".to_string(),
    }
}

impl MailSession for ImapSession {
    fn select(
        &mut self,
        folder: &str,
        since: Option<NaiveDate>,
    ) -> Result<Vec<u32>, MailboxError> {
        // EXAMINE is the read-only form of SELECT. The imap crate quotes
        // mailbox names itself, so hand it the bare name.
        self.session.examine(unquote_folder_name(folder))?;

        let mut seqs: Vec<u32> = self
            .session
            .search(search_criteria(since))?
            .into_iter()
            .collect();
        seqs.sort_unstable();
        Ok(seqs)
    }

    fn fetch_body(&mut self, seq: u32) -> Result<Vec<u8>, MailboxError> {
        let fetches = self.session.fetch(seq.to_string(), "RFC822")?;
        let fetch = fetches.iter().next().ok_or(MailboxError::NoSuchMessage(seq))?;
        fetch
            .body()
            .map(|body| body.to_vec())
            .ok_or(MailboxError::MissingData("RFC822 body"))
    }

    fn fetch_flags(&mut self, seq: u32) -> Result<Vec<String>, MailboxError> {
        let fetches = self.session.fetch(seq.to_string(), "FLAGS")?;
        let fetch = fetches.iter().next().ok_or(MailboxError::NoSuchMessage(seq))?;
        Ok(fetch.flags().iter().map(|f| f.to_string()).collect())
    }

    fn logout(&mut self) {
        if let Err(e) = self.session.logout() {
            tracing::debug!("IMAP logout failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_criteria() {
        assert_eq!(search_criteria(None), "ALL");
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        assert_eq!(search_criteria(Some(date)), "SINCE 05-Jan-2024");
    }
}
