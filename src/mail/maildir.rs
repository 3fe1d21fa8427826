use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, NaiveDate, Utc};

use super::error::{MailboxError, SessionError};
use super::fetch::unquote_folder_name;
use super::session::{Connector, MailSession};

/// Opens sessions over a local maildir tree (e.g. one synced by mbsync).
pub struct MaildirConnector {
    pub root: PathBuf,
}

impl MaildirConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Connector for MaildirConnector {
    type Session = MaildirSession;

    fn connect(&self) -> Result<MaildirSession, SessionError> {
        if !self.root.is_dir() {
            return Err(SessionError::Connect {
                server: self.root.to_string_lossy().to_string(),
                reason: "maildir root is not a directory".to_string(),
            });
        }
        Ok(MaildirSession {
            root: self.root.clone(),
            selected: None,
        })
    }
}

pub struct MaildirSession {
    root: PathBuf,
    selected: Option<Vec<PathBuf>>,
}

impl MaildirSession {
    /// Resolve a folder name to its directory. Accepts the plain name, a
    /// Maildir++ style ".Name" directory, or a case-insensitive match.
    fn folder_dir(&self, folder: &str) -> Option<PathBuf> {
        let name = unquote_folder_name(folder);

        let direct = self.root.join(&name);
        if direct.is_dir() {
            return Some(direct);
        }
        let dotted = self.root.join(format!(".{}", name.replace('/', ".")));
        if dotted.is_dir() {
            return Some(dotted);
        }

        // "INBOX" is often stored as "Inbox"
        let wanted = name.to_lowercase();
        std::fs::read_dir(&self.root)
            .ok()?
            .flatten()
            .map(|entry| entry.path())
            .find(|path| {
                path.is_dir()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.to_lowercase() == wanted)
                        .unwrap_or(false)
            })
    }

    fn selected_file(&self, seq: u32) -> Result<&Path, MailboxError> {
        let files = self.selected.as_ref().ok_or(MailboxError::NoSelection)?;
        // Sequence numbers start at 1, as in IMAP
        seq.checked_sub(1)
            .and_then(|i| files.get(i as usize))
            .map(|p| p.as_path())
            .ok_or(MailboxError::NoSuchMessage(seq))
    }
}

impl MailSession for MaildirSession {
    fn select(
        &mut self,
        folder: &str,
        since: Option<NaiveDate>,
    ) -> Result<Vec<u32>, MailboxError> {
        self.selected = None;
        let dir = self
            .folder_dir(folder)
            .ok_or_else(|| MailboxError::NoSuchFolder(folder.to_string()))?;

        let cutoff = since.and_then(|d| d.and_hms_opt(0, 0, 0)).map(|d| d.and_utc());

        // Collect all file paths from cur/ and new/
        let mut files: Vec<PathBuf> = Vec::new();
        for subdir in &["cur", "new"] {
            let Ok(entries) = std::fs::read_dir(dir.join(subdir)) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                if let Some(cutoff) = cutoff {
                    match file_mtime(&path) {
                        Some(mtime) if mtime < cutoff => continue,
                        _ => {}
                    }
                }
                files.push(path);
            }
        }
        // Directory order is arbitrary; keep sequence numbers stable
        files.sort();

        let seqs = (1..=files.len() as u32).collect();
        self.selected = Some(files);
        Ok(seqs)
    }

    fn fetch_body(&mut self, seq: u32) -> Result<Vec<u8>, MailboxError> {
        let path = self.selected_file(seq)?;
        Ok(std::fs::read(path)?)
    }

    fn fetch_flags(&mut self, seq: u32) -> Result<Vec<String>, MailboxError> {
        let path = self.selected_file(seq)?;
        Ok(parse_flags_from_filename(path))
    }
}

fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    let modified: SystemTime = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(modified.into())
}

/// Parse flags from maildir filename suffix (e.g., ":2,RS" -> ["\Answered", "\Seen"]).
/// Names follow the IMAP system flags so both backends label messages alike.
fn parse_flags_from_filename(path: &Path) -> Vec<String> {
    let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

    let Some(pos) = filename.find(":2,") else {
        return Vec::new();
    };

    filename[pos + 3..]
        .chars()
        .filter_map(|c| match c {
            'S' => Some("\\Seen"),
            'R' => Some("\\Answered"),
            'F' => Some("\\Flagged"),
            'D' => Some("\\Draft"),
            'T' => Some("\\Deleted"),
            'P' => Some("$Forwarded"),
            _ => None,
        })
        .map(str::to_string)
        .collect()
}
