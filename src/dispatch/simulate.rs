//! Write dispatched messages to disk instead of relaying them.
//!
//! Each message gets its own folder under the base directory:
//!
//! ```text
//! email_relay_simulation/
//! └── 20240301_093000_Invoices_for_March/
//!     ├── message.eml
//!     ├── merged_invoice.pdf
//!     └── logo.png
//! ```
//!
//! Files are written into `.<name>.partial` and the folder is renamed once
//! everything is on disk.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{debug, warn};

use crate::error::{RelayError, Result};
use crate::model::message::OutboundMessage;

use super::render::RenderedMessage;

/// Name of the rendered message inside each bundle.
pub const EML_NAME: &str = "message.eml";

/// Longest subject fragment used in a folder name, in bytes.
const SUBJECT_MAX_BYTES: usize = 120;

/// Longest attachment filename written to disk, in bytes. Leaves room for
/// `unique_path` counters under the 255-byte `NAME_MAX`.
const FILENAME_MAX_BYTES: usize = 200;

/// Extensions longer than this are not kept apart when truncating.
const EXTENSION_MAX_BYTES: usize = 16;

/// What a simulated dispatch left on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationBundle {
    pub folder_name: String,
    pub folder: PathBuf,
    pub eml_path: PathBuf,
    /// In outbound attachment order.
    pub attachment_paths: Vec<PathBuf>,
}

/// Persists messages as simulation bundles under one base directory.
#[derive(Debug)]
pub struct SimulationWriter {
    base_dir: PathBuf,
    used_names: HashSet<String>,
}

impl SimulationWriter {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            used_names: HashSet::new(),
        }
    }

    /// Write `rendered` and every attachment of `message` into a new bundle folder.
    pub fn write(
        &mut self,
        message: &OutboundMessage,
        rendered: &RenderedMessage,
        timestamp: DateTime<Local>,
    ) -> Result<SimulationBundle> {
        std::fs::create_dir_all(&self.base_dir).map_err(|e| RelayError::io(&self.base_dir, e))?;

        let folder_name = self.claim_folder_name(&message.subject, timestamp);
        let folder = self.base_dir.join(&folder_name);
        let staging = self.base_dir.join(format!(".{folder_name}.partial"));

        if staging.exists() {
            std::fs::remove_dir_all(&staging).map_err(|e| RelayError::io(&staging, e))?;
        }
        std::fs::create_dir(&staging).map_err(|e| RelayError::io(&staging, e))?;

        match write_contents(&staging, message, rendered) {
            Ok(staged_files) => {
                std::fs::rename(&staging, &folder).map_err(|e| {
                    discard(&staging);
                    RelayError::io(&folder, e)
                })?;
                debug!(folder = %folder.display(), "Wrote simulation bundle");

                let attachment_paths = staged_files
                    .iter()
                    .map(|name| folder.join(name))
                    .collect();
                Ok(SimulationBundle {
                    eml_path: folder.join(EML_NAME),
                    folder_name,
                    folder,
                    attachment_paths,
                })
            }
            Err(e) => {
                discard(&staging);
                Err(e)
            }
        }
    }

    /// First free `YYYYMMDD_HHMMSS_<subject>` name, suffixed `_2`, `_3`, … on collision.
    fn claim_folder_name(&mut self, subject: &str, timestamp: DateTime<Local>) -> String {
        let base = folder_name(subject, timestamp);
        let mut candidate = base.clone();
        let mut n = 2;
        while self.used_names.contains(&candidate) || self.base_dir.join(&candidate).exists() {
            candidate = format!("{base}_{n}");
            n += 1;
        }
        self.used_names.insert(candidate.clone());
        candidate
    }
}

/// Write the `.eml` and attachments; returns attachment filenames in order.
fn write_contents(
    dir: &Path,
    message: &OutboundMessage,
    rendered: &RenderedMessage,
) -> Result<Vec<String>> {
    let eml_path = dir.join(EML_NAME);
    std::fs::write(&eml_path, &rendered.bytes).map_err(|e| RelayError::io(&eml_path, e))?;

    let mut names = Vec::with_capacity(message.attachments.len());
    for attachment in &message.attachments {
        let safe = sanitize_attachment_name(&attachment.filename)?;
        let path = unique_path(&dir.join(&safe));
        std::fs::write(&path, &attachment.content).map_err(|e| RelayError::io(&path, e))?;
        names.push(
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or(safe),
        );
    }
    Ok(names)
}

fn discard(staging: &Path) {
    if let Err(e) = std::fs::remove_dir_all(staging) {
        warn!(path = %staging.display(), error = %e, "Failed to remove partial bundle");
    }
}

/// Folder name for a message: `YYYYMMDD_HHMMSS_<sanitized subject>`.
pub fn folder_name(subject: &str, timestamp: DateTime<Local>) -> String {
    let date = timestamp.format("%Y%m%d_%H%M%S").to_string();
    let subject = sanitize_filename_part(subject, SUBJECT_MAX_BYTES);
    format!("{date}_{subject}")
}

/// Sanitize a string for use in filenames.
///
/// Replaces invalid characters with `_` and truncates to `max_len` bytes.
pub fn sanitize_filename_part(s: &str, max_len: usize) -> String {
    let sanitized: String = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '.' || c == '_' || c == '@' {
                c
            } else {
                '_'
            }
        })
        .collect();

    match truncate_bytes(&sanitized, max_len) {
        "" => "no_subject".to_string(),
        truncated => truncated.to_string(),
    }
}

/// Keep an attachment's name but make it a single, local path component.
///
/// Path separators and control characters become `_`. Names that still do
/// not resolve to a plain file inside the folder (`.`, `..`, empty) are
/// rejected with `UnsafeFilename`.
pub fn sanitize_attachment_name(name: &str) -> Result<String> {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = truncate_keeping_extension(&cleaned, FILENAME_MAX_BYTES);

    let mut components = Path::new(&cleaned).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(cleaned),
        _ => Err(RelayError::UnsafeFilename(name.to_string())),
    }
}

/// Longest prefix of `s` within `max` bytes that ends on a char boundary.
fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Like [`truncate_bytes`], but the stem is shortened and `.ext` survives.
fn truncate_keeping_extension(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }
    match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot <= EXTENSION_MAX_BYTES => {
            let (stem, ext) = name.split_at(dot);
            format!("{}{ext}", truncate_bytes(stem, max - ext.len()))
        }
        _ => truncate_bytes(name, max).to_string(),
    }
}

/// If `path` already exists, append a counter to make it unique.
pub(crate) fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let parent = path.parent().unwrap_or(Path::new("."));

    let mut i = 1;
    loop {
        let candidate = if ext.is_empty() {
            parent.join(format!("{stem}_{i}"))
        } else {
            parent.join(format!("{stem}_{i}.{ext}"))
        };
        if !candidate.exists() {
            return candidate;
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::render::render;
    use crate::model::address::EmailAddress;
    use crate::model::attachment::{Attachment, PDF_MIME};
    use crate::model::message::Body;
    use chrono::{TimeZone, Utc};

    fn message(subject: &str, attachments: Vec<Attachment>) -> OutboundMessage {
        OutboundMessage {
            subject: subject.into(),
            sender: EmailAddress::bare("billing@vendor.test"),
            recipients: vec![EmailAddress::bare("ap@acme.test")],
            headers: vec![],
            date: Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap(),
            body: Body::plain("See attached."),
            attachments,
        }
    }

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename_part("hello world", 20), "hello_world");
        assert_eq!(sanitize_filename_part("Re: INV/2024", 60), "Re__INV_2024");
        assert_eq!(sanitize_filename_part("", 20), "no_subject");
        assert_eq!(sanitize_filename_part(&"x".repeat(100), 60).len(), 60);
    }

    #[test]
    fn test_truncation_counts_bytes() {
        let subject = sanitize_filename_part(&"請求書".repeat(40), SUBJECT_MAX_BYTES);
        assert!(subject.len() <= SUBJECT_MAX_BYTES);
        assert!(subject.starts_with("請求書"));

        let name = sanitize_attachment_name(&format!("{}.pdf", "請求書".repeat(40))).unwrap();
        assert!(name.len() <= FILENAME_MAX_BYTES, "{} bytes", name.len());
        assert!(name.ends_with(".pdf"));
        assert!(name.starts_with("請求書"));

        let long = format!("{}.pdf", "a".repeat(300));
        let name = sanitize_attachment_name(&long).unwrap();
        assert_eq!(name.len(), FILENAME_MAX_BYTES);
        assert!(name.ends_with(".pdf"));
    }

    #[test]
    fn test_long_non_ascii_names_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SimulationWriter::new(dir.path());
        let long = "請求書".repeat(40);
        let msg = message(
            &long,
            vec![Attachment::new(format!("{long}.pdf"), PDF_MIME, b"%PDF".to_vec())],
        );
        let bundle = writer.write(&msg, &render(&msg).unwrap(), at()).unwrap();
        assert!(bundle.folder.is_dir());
        assert_eq!(bundle.attachment_paths.len(), 1);
        let written = bundle.attachment_paths[0].file_name().unwrap().to_string_lossy();
        assert!(written.ends_with(".pdf"));
    }

    #[test]
    fn test_attachment_name_rules() {
        assert_eq!(sanitize_attachment_name("INV 2024.pdf").unwrap(), "INV 2024.pdf");
        assert_eq!(sanitize_attachment_name("../../etc/passwd").unwrap(), ".._.._etc_passwd");
        assert_eq!(sanitize_attachment_name("a\u{0}b.pdf").unwrap(), "a_b.pdf");
        assert!(sanitize_attachment_name("..").is_err());
        assert!(sanitize_attachment_name(".").is_err());
        assert!(sanitize_attachment_name("   ").is_err());
    }

    #[test]
    fn test_write_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SimulationWriter::new(dir.path());
        let msg = message(
            "Invoices for March",
            vec![
                Attachment::new("merged_invoice.pdf", PDF_MIME, b"%PDF-1.5".to_vec()),
                Attachment::new("logo.png", "image/png", vec![1, 2, 3]),
            ],
        );
        let rendered = render(&msg).unwrap();
        let bundle = writer.write(&msg, &rendered, at()).unwrap();

        assert_eq!(bundle.folder_name, "20240301_093000_Invoices_for_March");
        assert_eq!(std::fs::read(&bundle.eml_path).unwrap(), rendered.bytes);
        assert_eq!(std::fs::read(&bundle.attachment_paths[0]).unwrap(), b"%PDF-1.5");
        assert_eq!(std::fs::read(&bundle.attachment_paths[1]).unwrap(), vec![1, 2, 3]);
        assert!(!dir.path().join(".20240301_093000_Invoices_for_March.partial").exists());
    }

    #[test]
    fn test_same_second_same_subject_is_suffixed() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SimulationWriter::new(dir.path());
        let msg = message("Invoice", vec![]);
        let rendered = render(&msg).unwrap();

        let names: Vec<String> = (0..3)
            .map(|_| writer.write(&msg, &rendered, at()).unwrap().folder_name)
            .collect();
        assert_eq!(
            names,
            vec![
                "20240301_093000_Invoice",
                "20240301_093000_Invoice_2",
                "20240301_093000_Invoice_3"
            ]
        );
    }

    #[test]
    fn test_existing_folder_from_earlier_run_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("20240301_093000_Invoice")).unwrap();
        let mut writer = SimulationWriter::new(dir.path());
        let msg = message("Invoice", vec![]);
        let bundle = writer.write(&msg, &render(&msg).unwrap(), at()).unwrap();
        assert_eq!(bundle.folder_name, "20240301_093000_Invoice_2");
    }

    #[test]
    fn test_duplicate_attachment_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SimulationWriter::new(dir.path());
        let msg = message(
            "Dupes",
            vec![
                Attachment::new("scan.png", "image/png", vec![1]),
                Attachment::new("scan.png", "image/png", vec![2]),
            ],
        );
        let bundle = writer.write(&msg, &render(&msg).unwrap(), at()).unwrap();
        let names: Vec<String> = bundle
            .attachment_paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["scan.png", "scan_1.png"]);
    }

    #[test]
    fn test_unsafe_name_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SimulationWriter::new(dir.path());
        let msg = message("Bad", vec![Attachment::new("..", "image/png", vec![1])]);
        let err = writer.write(&msg, &render(&msg).unwrap(), at()).unwrap_err();
        assert!(matches!(err, RelayError::UnsafeFilename(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
