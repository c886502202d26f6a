//! Local mail sources.
//!
//! A source hands out each message once: whatever it returns from
//! [`MailSource::fetch_unprocessed`] has already been marked consumed, so a
//! second run never relays the same message twice.

pub mod mbox;
pub mod spool;

use std::path::Path;

use crate::config::{Config, SourceKind};
use crate::error::{RelayError, Result};
use crate::model::message::InboundMessage;

pub use mbox::MboxSource;
pub use spool::SpoolSource;

/// Yields inbound messages that have not been handed out before.
pub trait MailSource {
    fn fetch_unprocessed(&mut self) -> Result<Vec<InboundMessage>>;

    /// Human-readable location for logs and reports.
    fn describe(&self) -> String;
}

/// Build the source named by the configuration.
pub fn from_config(config: &Config) -> Box<dyn MailSource> {
    let path = config.source_path();
    match config.source.kind {
        SourceKind::Spool => Box::new(SpoolSource::new(path)),
        SourceKind::Mbox => Box::new(MboxSource::new(path)),
    }
}

/// Move `path` into `dir`, never overwriting an existing file.
fn move_into(path: &Path, dir: &Path) -> Result<std::path::PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| RelayError::io(dir, e))?;
    let name = path.file_name().unwrap_or_default();
    let target = crate::dispatch::simulate::unique_path(&dir.join(name));
    std::fs::rename(path, &target).map_err(|e| RelayError::io(path, e))?;
    Ok(target)
}
