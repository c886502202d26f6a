//! Decoded message attachments.

/// MIME type that identifies a PDF regardless of filename.
pub const PDF_MIME: &str = "application/pdf";

/// Fallback MIME type for parts that do not declare one.
pub const DEFAULT_MIME: &str = "application/octet-stream";

/// MIME types that say nothing about the payload, so the filename decides.
const GENERIC_MIME_TYPES: &[&str] = &[
    "",
    DEFAULT_MIME,
    "application/binary",
    "binary/octet-stream",
    "application/x-download",
    "application/force-download",
];

/// One attachment with its fully decoded payload.
///
/// Attachments are never modified in place; the pipeline builds new values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Filename from `Content-Disposition` / `Content-Type`. Generated if missing.
    pub filename: String,

    /// Lowercased MIME type without parameters (e.g. `"application/pdf"`).
    pub mime_type: String,

    /// Decoded bytes (transfer encoding already removed).
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn new(
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            filename: filename.into(),
            mime_type: normalize_mime(&mime_type.into()),
            content: content.into(),
        }
    }

    /// `true` if this attachment is a PDF.
    ///
    /// A specific MIME type wins over the filename: `image/png` named
    /// `scan.pdf` is not a PDF. Absent or generic types fall back to a
    /// case-insensitive `.pdf` extension check.
    pub fn is_pdf(&self) -> bool {
        match self.mime_type.as_str() {
            PDF_MIME | "application/x-pdf" => true,
            generic if GENERIC_MIME_TYPES.contains(&generic) => {
                self.filename.to_lowercase().ends_with(".pdf")
            }
            _ => false,
        }
    }

    /// Decoded size in bytes.
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

/// Strip parameters and lowercase: `"Application/PDF; name=x"` → `"application/pdf"`.
fn normalize_mime(raw: &str) -> String {
    raw.split(';').next().unwrap_or("").trim().to_ascii_lowercase()
}
