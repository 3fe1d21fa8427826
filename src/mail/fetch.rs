use chrono::NaiveDate;
use rayon::prelude::*;
use serde::Deserialize;

use super::error::{FolderAccessError, MessageFetchError, SessionError, ThreadingError};
use super::session::{Connector, MailSession};
use super::types::RawMessage;

/// One logical folder and the names it may go by, in priority order.
/// e.g. `["[Gmail]/Sent Mail", "Sent", "Sent Items"]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "AliasList")]
pub struct FolderGroup {
    pub aliases: Vec<String>,
}

/// Config accepts either a single name or a list of aliases
#[derive(Deserialize)]
#[serde(untagged)]
enum AliasList {
    One(String),
    Many(Vec<String>),
}

impl From<AliasList> for FolderGroup {
    fn from(list: AliasList) -> Self {
        match list {
            AliasList::One(name) => FolderGroup::single(name),
            AliasList::Many(aliases) => FolderGroup { aliases },
        }
    }
}

impl FolderGroup {
    pub fn single(name: impl Into<String>) -> Self {
        Self {
            aliases: vec![name.into()],
        }
    }

    pub fn aliases<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            aliases: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Sent folder names across common providers, then the inbox
    pub fn defaults() -> Vec<FolderGroup> {
        vec![
            FolderGroup::aliases(["[Gmail]/Sent Mail", "[Gmail]/Sent", "Sent", "Sent Items"]),
            FolderGroup::single("INBOX"),
        ]
    }
}

/// Namespaces whose folder names must always be sent quoted
const QUOTED_NAMESPACES: &[&str] = &["[Gmail]", "[Google Mail]"];

/// Inner text of a well-formed quoted string, where every `"` and `\`
/// inside is escaped
fn quoted_inner(name: &str) -> Option<&str> {
    let inner = name.strip_prefix('"')?.strip_suffix('"')?;
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if !matches!(chars.next(), Some('\\' | '"')) {
                    return None;
                }
            }
            '"' => return None,
            _ => {}
        }
    }
    Some(inner)
}

/// Quote a folder name for the session if it needs it. Never quotes twice.
pub fn quote_folder_name(name: &str) -> String {
    if quoted_inner(name).is_some() {
        return name.to_string();
    }

    let special = name
        .chars()
        .any(|c| matches!(c, ' ' | '"' | '(' | ')' | '{' | '%' | '*' | '\\'));
    let namespaced = QUOTED_NAMESPACES.iter().any(|ns| name.starts_with(ns));

    if special || namespaced {
        let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{}\"", escaped)
    } else {
        name.to_string()
    }
}

/// Reverse of [`quote_folder_name`], for backends that take the bare name
pub fn unquote_folder_name(name: &str) -> String {
    let Some(inner) = quoted_inner(name) else {
        return name.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        // quoted_inner guarantees an escaped character follows
        out.push(if c == '\\' { chars.next().unwrap_or(c) } else { c });
    }
    out
}

/// Why a folder produced no messages
enum FolderFailure {
    /// Skip the folder, the session is still usable
    Access(FolderAccessError),
    /// The session is gone and the run must stop
    Lost(SessionError),
}

/// Fetch every message of a single folder. Messages that fail to come back
/// are logged and skipped. A folder that cannot be selected is returned as
/// [`FolderFailure::Access`], a dropped connection as [`FolderFailure::Lost`].
fn fetch_folder<S: MailSession>(
    session: &mut S,
    folder: &str,
    since: Option<NaiveDate>,
) -> Result<Vec<RawMessage>, FolderFailure> {
    let quoted = quote_folder_name(folder);
    let seqs = match session.select(&quoted, since) {
        Ok(seqs) => seqs,
        Err(source) if source.is_connection_lost() => {
            return Err(FolderFailure::Lost(SessionError::lost(folder, &source)));
        }
        Err(source) => {
            return Err(FolderFailure::Access(FolderAccessError {
                folder: folder.to_string(),
                source,
            }));
        }
    };

    tracing::debug!(folder, count = seqs.len(), "folder selected");

    let mut messages = Vec::with_capacity(seqs.len());
    for seq in seqs {
        let fetched = session
            .fetch_body(seq)
            .and_then(|blob| session.fetch_flags(seq).map(|flags| (blob, flags)))
            .map_err(|source| MessageFetchError {
                folder: folder.to_string(),
                seq,
                source,
            });

        match fetched {
            Ok((blob, flags)) => messages.push(RawMessage {
                blob,
                flags,
                folder: folder.to_string(),
                seq,
            }),
            Err(e) if e.source.is_connection_lost() => {
                return Err(FolderFailure::Lost(SessionError::lost(folder, &e.source)));
            }
            Err(e) => tracing::warn!(folder, message = seq, "{}", e),
        }
    }

    Ok(messages)
}

/// Try each alias in order and keep the first that yields any messages.
fn fetch_group<S: MailSession>(
    session: &mut S,
    group: &FolderGroup,
    since: Option<NaiveDate>,
) -> Result<Vec<RawMessage>, SessionError> {
    for alias in &group.aliases {
        match fetch_folder(session, alias, since) {
            Ok(messages) if !messages.is_empty() => {
                tracing::info!(folder = %alias, count = messages.len(), "fetched folder");
                return Ok(messages);
            }
            Ok(_) => tracing::debug!(folder = %alias, "folder empty, trying next alias"),
            Err(FolderFailure::Access(e)) => tracing::warn!(folder = %alias, "{}", e),
            Err(FolderFailure::Lost(e)) => return Err(e),
        }
    }
    tracing::info!(aliases = ?group.aliases, "no messages found for folder");
    Ok(Vec::new())
}

/// Fetch all folder groups in parallel on at most `workers` sessions.
///
/// Every session is opened before any folder is touched, so a login failure
/// aborts the run without partial results. A connection lost mid-fetch
/// aborts it too. Each worker owns one session and works through its share
/// of groups; results are reassembled in the order the groups were given,
/// whatever order the workers finish in.
pub fn fetch_folders<C: Connector>(
    connector: &C,
    groups: &[FolderGroup],
    since: Option<NaiveDate>,
    workers: usize,
) -> Result<Vec<RawMessage>, ThreadingError> {
    if groups.is_empty() {
        return Ok(Vec::new());
    }
    let workers = workers.clamp(1, groups.len());

    let sessions = (0..workers)
        .map(|_| connector.connect())
        .collect::<Result<Vec<_>, _>>()?;

    // Round-robin the groups over the sessions, remembering their position
    let mut lanes: Vec<(C::Session, Vec<(usize, &FolderGroup)>)> =
        sessions.into_iter().map(|s| (s, Vec::new())).collect();
    for (idx, group) in groups.iter().enumerate() {
        lanes[idx % workers].1.push((idx, group));
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()?;

    let per_lane: Vec<Vec<(usize, Vec<RawMessage>)>> = pool.install(|| {
        lanes
            .into_par_iter()
            .map(|(mut session, assigned)| {
                let fetched = assigned
                    .into_iter()
                    .map(|(idx, group)| fetch_group(&mut session, group, since).map(|m| (idx, m)))
                    .collect::<Result<Vec<_>, _>>();
                session.logout();
                fetched
            })
            .collect::<Result<Vec<_>, SessionError>>()
    })?;

    let mut results: Vec<(usize, Vec<RawMessage>)> = per_lane.into_iter().flatten().collect();
    results.sort_by_key(|(idx, _)| *idx);
    Ok(results.into_iter().flat_map(|(_, msgs)| msgs).collect())
}
