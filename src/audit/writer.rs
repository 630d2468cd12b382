//! JSONL decision log with one file per calendar day.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{NaiveDate, Utc};
use tracing::{debug, warn};

use super::{AuditEntry, AuditLogger};
use crate::{AppError, Result};

struct OpenLog {
    date: NaiveDate,
    writer: BufWriter<File>,
}

/// Appends one JSON object per line to `<log_dir>/decisions-YYYY-MM-DD.jsonl`,
/// switching files when the UTC date changes between writes.
pub struct JsonlAuditWriter {
    log_dir: PathBuf,
    open: Mutex<Option<OpenLog>>,
}

impl JsonlAuditWriter {
    /// Construct a writer rooted at `log_dir`, creating the directory.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Audit`] if the directory cannot be created.
    pub fn new(log_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&log_dir).map_err(|err| {
            AppError::Audit(format!(
                "failed to create decision log directory {}: {err}",
                log_dir.display()
            ))
        })?;
        Ok(Self {
            log_dir,
            open: Mutex::new(None),
        })
    }

    /// File that entries written on `date` go to.
    #[must_use]
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.log_dir.join(format!("decisions-{date}.jsonl"))
    }

    fn open(path: &Path) -> Result<BufWriter<File>> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| {
                AppError::Audit(format!("failed to open {}: {err}", path.display()))
            })?;
        debug!(path = %path.display(), "decision log opened");
        Ok(BufWriter::new(file))
    }
}

impl AuditLogger for JsonlAuditWriter {
    fn log_entry(&self, entry: AuditEntry) -> Result<()> {
        let line = serde_json::to_string(&entry)
            .map_err(|err| AppError::Audit(format!("failed to serialize entry: {err}")))?;
        let today = Utc::now().date_naive();

        let mut guard = self
            .open
            .lock()
            .map_err(|_| AppError::Audit("decision log mutex poisoned".into()))?;

        let log = match guard.take() {
            Some(log) if log.date == today => log,
            _ => OpenLog {
                date: today,
                writer: Self::open(&self.path_for(today))?,
            },
        };
        let log = guard.insert(log);

        writeln!(log.writer, "{line}")
            .and_then(|()| log.writer.flush())
            .map_err(|err| {
                warn!(%err, "decision log write failed");
                AppError::Audit(format!("write failed: {err}"))
            })
    }
}
