//! Inbound and outbound message types.

use chrono::{DateTime, Utc};

use super::address::EmailAddress;
use super::attachment::Attachment;

/// A single header line, unfolded, with its name in original case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: String,
    /// Raw value (RFC 2047 encoded-words are left as they arrived).
    pub value: String,
}

impl HeaderField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Case-insensitive name comparison.
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Message body. Either part may be absent; both absent means an empty body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body {
    /// Plain-text body (`text/plain` part).
    pub text: Option<String>,
    /// HTML body (`text/html` part).
    pub html: Option<String>,
}

impl Body {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            html: None,
        }
    }
}

/// A message as fetched from the mail source.
///
/// Immutable once fetched: the pipeline only borrows it, so the original
/// stays available until the whole batch has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Decoded subject line.
    pub subject: String,
    /// First `From:` mailbox.
    pub sender: EmailAddress,
    /// `To:` mailboxes in header order.
    pub recipients: Vec<EmailAddress>,
    /// Every header in original order.
    pub headers: Vec<HeaderField>,
    /// Parsed `Date:` header, if present and readable.
    pub date: Option<DateTime<Utc>>,
    pub body: Body,
    /// Attachments in MIME order.
    pub attachments: Vec<Attachment>,
}

impl InboundMessage {
    /// First value of a header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Number of PDF attachments.
    pub fn pdf_count(&self) -> usize {
        self.attachments.iter().filter(|a| a.is_pdf()).count()
    }
}

/// A message ready for dispatch: invoice PDFs consolidated, everything else as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub subject: String,
    pub sender: EmailAddress,
    pub recipients: Vec<EmailAddress>,
    /// Copied headers, minus those re-derived at render time.
    pub headers: Vec<HeaderField>,
    /// Original date, or the processing time when the original had none.
    pub date: DateTime<Utc>,
    pub body: Body,
    pub attachments: Vec<Attachment>,
}

impl OutboundMessage {
    /// First value of a header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Total decoded attachment bytes.
    pub fn attachment_bytes(&self) -> u64 {
        self.attachments.iter().map(Attachment::size).sum()
    }
}

fn find_header<'a>(headers: &'a [HeaderField], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.is(name))
        .map(|h| h.value.as_str())
}
