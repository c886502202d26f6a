//! Directory of `.eml` files, one message per file.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{RelayError, Result};
use crate::model::message::InboundMessage;
use crate::parser::eml::read_eml;

use super::{move_into, MailSource};

/// Fetched files are moved here.
pub const PROCESSED_DIR: &str = "processed";

/// Files that could not be parsed are moved here.
pub const FAILED_DIR: &str = "failed";

/// Reads `*.eml` from a directory in filename order.
#[derive(Debug, Clone)]
pub struct SpoolSource {
    dir: PathBuf,
}

impl SpoolSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn pending_files(&self) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| RelayError::Source {
            path: self.dir.clone(),
            reason: e.to_string(),
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_eml(path))
            .collect();
        files.sort();
        Ok(files)
    }
}

impl MailSource for SpoolSource {
    fn fetch_unprocessed(&mut self) -> Result<Vec<InboundMessage>> {
        let files = self.pending_files()?;
        let processed = self.dir.join(PROCESSED_DIR);
        let failed = self.dir.join(FAILED_DIR);
        let mut messages = Vec::with_capacity(files.len());

        for path in files {
            let message = match read_eml(&path) {
                Ok(message) => message,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unreadable message, moving to failed/");
                    if let Err(move_err) = move_into(&path, &failed) {
                        warn!(path = %path.display(), error = %move_err, "Failed to quarantine message");
                    }
                    continue;
                }
            };

            match move_into(&path, &processed) {
                Ok(target) => {
                    debug!(from = %path.display(), to = %target.display(), "Consumed message");
                    messages.push(message);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot mark message processed, skipping");
                }
            }
        }

        Ok(messages)
    }

    fn describe(&self) -> String {
        format!("spool {}", self.dir.display())
    }
}

fn is_eml(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("eml"))
}
