//! RFC 5322 header block parsing: unfolding, encoded-words (RFC 2047), dates.

use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use tracing::warn;

use crate::model::address::EmailAddress;
use crate::model::message::HeaderField;

/// Header block split into the raw field list plus the typed fields the pipeline needs.
#[derive(Debug, Clone, Default)]
pub struct ParsedHeaders {
    /// Every field, unfolded, in original order and case.
    pub fields: Vec<HeaderField>,
    /// Decoded `Subject:`.
    pub subject: String,
    /// First `From:` mailbox.
    pub sender: EmailAddress,
    /// `To:` mailboxes.
    pub recipients: Vec<EmailAddress>,
    /// Parsed `Date:`.
    pub date: Option<DateTime<Utc>>,
}

/// Parse a raw header block (everything before the first blank line).
pub fn parse_header_block(raw_headers: &[u8]) -> ParsedHeaders {
    let text = decode_header_bytes(raw_headers);
    let fields = unfold_headers(&text);

    let first = |name: &str| {
        fields
            .iter()
            .find(|f| f.is(name))
            .map(|f| f.value.as_str())
            .unwrap_or_default()
    };

    let subject = decode_encoded_words(first("subject"));
    let sender = EmailAddress::parse(&decode_encoded_words(first("from")));
    let recipients = EmailAddress::parse_list(&decode_encoded_words(first("to")));
    let date = parse_date(first("date"));

    ParsedHeaders {
        subject,
        sender,
        recipients,
        date,
        fields,
    }
}

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then Windows-1252 (which accepts every byte).
fn decode_header_bytes(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Join continuation lines (leading space or tab) onto the previous field.
///
/// Names keep their original case so the fields can be re-emitted verbatim.
/// Lines that are neither a field nor a continuation are dropped.
pub fn unfold_headers(text: &str) -> Vec<HeaderField> {
    let mut fields: Vec<HeaderField> = Vec::new();

    for line in text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = fields.last_mut() {
                last.value.push(' ');
                last.value.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if !name.is_empty() && !name.contains(' ') {
                fields.push(HeaderField::new(name, value.trim()));
            }
        }
    }

    fields
}

/// Decode RFC 2047 encoded-words, e.g. `=?UTF-8?B?SG9sYQ==?=` → `Hola`.
///
/// Values without encoded-words are returned unchanged; undecodable input is
/// returned as-is.
pub fn decode_encoded_words(input: &str) -> String {
    if !input.contains("=?") {
        return input.to_string();
    }
    // mail-parser handles every charset and both B/Q encodings; wrap the value
    // in a one-header message so it can be reused for a bare value.
    let wrapped = format!("Subject: {input}\r\n\r\n");
    MessageParser::default()
        .parse(wrapped.as_bytes())
        .and_then(|msg| msg.subject().map(str::to_string))
        .unwrap_or_else(|| input.to_string())
}

/// Parse an email date in RFC 2822, RFC 3339, or anything mail-parser accepts.
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    let wrapped = format!("Date: {trimmed}\r\n\r\n");
    let parsed = MessageParser::default()
        .parse(wrapped.as_bytes())
        .and_then(|msg| msg.date().map(|d| d.to_rfc3339()))
        .and_then(|rfc3339| DateTime::parse_from_rfc3339(&rfc3339).ok())
        .map(|d| d.with_timezone(&Utc));

    if parsed.is_none() {
        warn!(date = trimmed, "Could not parse date");
    }
    parsed
}
