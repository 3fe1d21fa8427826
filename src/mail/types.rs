use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// One message as retrieved from a folder, before any parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub blob: Vec<u8>,
    pub flags: Vec<String>,
    /// Folder the message was fetched from (unquoted alias name)
    pub folder: String,
    /// Sequence number within the folder at fetch time
    pub seq: u32,
}

/// Canonical record for one physical message.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MessageRecord {
    /// Message-ID header as written by the sender, empty if the message had none
    pub message_id: String,
    /// Human-readable form of `timestamp`, always in UTC
    pub datetime: String,
    /// Seconds since epoch
    pub timestamp: f64,
    pub sender: String,
    pub receiver: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub in_reply_to: String,
    #[serde(default)]
    pub labels: BTreeSet<String>,

    // Only used to derive labels, never written out
    #[serde(skip)]
    pub folder: String,
}

impl MessageRecord {
    /// Whether this record can take part in threading at all
    pub fn has_id(&self) -> bool {
        !self.message_id.is_empty()
    }
}

/// One reconstructed conversation, messages in chronological order.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ThreadRecord {
    pub thread_id: String,
    pub total_messages: usize,
    pub labels: BTreeSet<String>,
    pub reply_to_message_id: String,
    pub messages: Vec<MessageRecord>,
}

impl ThreadRecord {
    /// Timestamp of the most recent message in the thread
    pub fn last_activity(&self) -> f64 {
        self.messages
            .iter()
            .map(|m| m.timestamp)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn subject(&self) -> &str {
        self.messages
            .first()
            .map(|m| m.subject.as_str())
            .unwrap_or("")
    }
}
