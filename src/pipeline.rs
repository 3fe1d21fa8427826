use std::path::PathBuf;

use chrono::{NaiveDate, TimeDelta, Utc};

use crate::mail::{
    Connector, FolderGroup, MessageRecord, ThreadingError, build_threads, fetch_folders,
    normalize_message, save_threads,
};

/// What to fetch and where to put the result
#[derive(Debug, Clone)]
pub struct ThreadRequest {
    pub folders: Vec<FolderGroup>,
    /// Only messages from the last `days` days; `None` for all history
    pub days: Option<u32>,
    pub workers: usize,
    pub output: PathBuf,
}

impl ThreadRequest {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            folders: FolderGroup::defaults(),
            days: None,
            workers: 4,
            output: output.into(),
        }
    }

    /// First day to fetch. A cutoff earlier than any representable date
    /// means all history.
    fn since(&self) -> Option<NaiveDate> {
        let days = self.days?;
        let cutoff = TimeDelta::try_days(i64::from(days))
            .and_then(|delta| Utc::now().checked_sub_signed(delta));
        if cutoff.is_none() {
            tracing::debug!(days, "day cutoff out of range, fetching all history");
        }
        cutoff.map(|date| date.date_naive())
    }
}

/// Fetch the configured folders, rebuild conversation threads and write
/// them to `request.output`.
///
/// Folder and message failures are logged and skipped. Only a session
/// failure or a failed write makes the run fail, and in both cases no
/// document is left behind.
pub fn fetch_email_threads<C: Connector>(
    connector: &C,
    request: &ThreadRequest,
) -> Result<PathBuf, ThreadingError> {
    let retrieved_at = Utc::now();

    let raw = fetch_folders(connector, &request.folders, request.since(), request.workers)
        .inspect_err(|e| tracing::error!("fetch aborted: {}", e))?;
    tracing::info!(messages = raw.len(), "fetched messages");

    let records: Vec<MessageRecord> = raw
        .iter()
        .filter_map(|message| match normalize_message(message, retrieved_at) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(folder = %message.folder, message = message.seq, "{}", e);
                None
            }
        })
        .collect();

    let without_id = records.iter().filter(|r| !r.has_id()).count();
    if without_id > 0 {
        tracing::info!(count = without_id, "messages without Message-ID left out of threading");
    }

    let threads = build_threads(&records);
    tracing::info!(
        records = records.len(),
        threads = threads.len(),
        "assembled threads"
    );

    save_threads(&threads, &request.output)
        .inspect_err(|e| tracing::error!("failed to save threads: {}", e))
        .map_err(ThreadingError::from)
}
