//! Single mbox file, consumed whole.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::dispatch::simulate::unique_path;
use crate::error::{RelayError, Result};
use crate::model::message::InboundMessage;
use crate::parser::mbox::{is_mbox, split_mbox};
use crate::parser::mime::parse_message;

use super::MailSource;

/// Reads every message of an mbox file, then renames it to `<name>.processed`.
#[derive(Debug, Clone)]
pub struct MboxSource {
    path: PathBuf,
}

impl MboxSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn source_error(&self, reason: impl Into<String>) -> RelayError {
        RelayError::Source {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }
}

impl MailSource for MboxSource {
    fn fetch_unprocessed(&mut self) -> Result<Vec<InboundMessage>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No mbox spool, nothing to fetch");
            return Ok(Vec::new());
        }

        let data = std::fs::read(&self.path).map_err(|e| self.source_error(e.to_string()))?;
        if data.is_empty() {
            return Ok(Vec::new());
        }
        if !is_mbox(&data) {
            return Err(self.source_error("file does not start with a 'From ' line"));
        }

        let mut processed_name = self.path.as_os_str().to_owned();
        processed_name.push(".processed");
        let target = unique_path(&PathBuf::from(processed_name));
        std::fs::rename(&self.path, &target).map_err(|e| self.source_error(e.to_string()))?;

        let messages: Vec<InboundMessage> = split_mbox(&data)
            .iter()
            .map(|m| parse_message(&m.raw))
            .collect();
        info!(
            path = %self.path.display(),
            archived = %target.display(),
            count = messages.len(),
            "Consumed mbox"
        );
        Ok(messages)
    }

    fn describe(&self) -> String {
        format!("mbox {}", self.path.display())
    }
}
