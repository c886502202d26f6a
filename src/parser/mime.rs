//! MIME message parsing: raw RFC 5322 bytes → [`InboundMessage`].

use mail_parser::{MessageParser, MimeHeaders, PartType};

use crate::model::attachment::{Attachment, DEFAULT_MIME};
use crate::model::message::{Body, InboundMessage};
use crate::parser::header;

/// Parse a complete raw message (headers + body).
///
/// Header fields come from our own unfolding so they can be re-emitted
/// verbatim; bodies and attachments are decoded by `mail-parser`. A message
/// `mail-parser` rejects still yields its headers and the raw text after the
/// blank line as body.
pub fn parse_message(raw_message: &[u8]) -> InboundMessage {
    let message_bytes = skip_from_line(raw_message);
    let header_end = find_header_end(message_bytes).unwrap_or(message_bytes.len());
    let headers = header::parse_header_block(&message_bytes[..header_end]);

    let (body, attachments) = match MessageParser::default().parse(message_bytes) {
        Some(msg) => (body_from_parsed(&msg), attachments_from_parsed(&msg)),
        None => (Body::plain(body_fallback(message_bytes)), Vec::new()),
    };

    InboundMessage {
        subject: headers.subject,
        sender: headers.sender,
        recipients: headers.recipients,
        headers: headers.fields,
        date: headers.date,
        body,
        attachments,
    }
}

/// The first inline text and HTML parts, exactly as sent.
///
/// `body_text`/`body_html` convert one into the other when a part is missing,
/// so only parts of the matching type are taken.
fn body_from_parsed(msg: &mail_parser::Message<'_>) -> Body {
    let text = msg.text_part(0).and_then(|part| match &part.body {
        PartType::Text(text) => Some(text.to_string()),
        _ => None,
    });
    let html = msg.html_part(0).and_then(|part| match &part.body {
        PartType::Html(html) => Some(html.to_string()),
        _ => None,
    });
    Body { text, html }
}

/// Decode every attachment part, in MIME order.
fn attachments_from_parsed(msg: &mail_parser::Message<'_>) -> Vec<Attachment> {
    msg.attachments()
        .enumerate()
        .map(|(idx, part)| {
            let filename = part
                .attachment_name()
                .map(String::from)
                .unwrap_or_else(|| format!("attachment_{}", idx + 1));

            let mime_type = part
                .content_type()
                .map(|ct: &mail_parser::ContentType| match ct.subtype() {
                    Some(sub) => format!("{}/{}", ct.ctype(), sub),
                    None => ct.ctype().to_string(),
                })
                .unwrap_or_else(|| DEFAULT_MIME.to_string());

            Attachment::new(filename, mime_type, part.contents().to_vec())
        })
        .collect()
}

/// Skip a leading UTF-8 BOM and an mbox `From ` separator line.
pub fn skip_from_line(data: &[u8]) -> &[u8] {
    let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);
    if data.starts_with(b"From ") {
        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            return &data[pos + 1..];
        }
    }
    data
}

/// Byte offset of the blank line that ends the header block.
pub fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(2)
        .position(|w| w == b"\n\n")
        .into_iter()
        .chain(data.windows(4).position(|w| w == b"\r\n\r\n"))
        .min()
}

/// Everything after the first blank line, lossily decoded.
fn body_fallback(data: &[u8]) -> String {
    match find_header_end(data) {
        Some(end) => {
            let rest = &data[end..];
            let skip = rest.iter().take_while(|&&b| b == b'\r' || b == b'\n').count();
            String::from_utf8_lossy(&rest[skip..]).into_owned()
        }
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTIPART: &[u8] = b"From: Vendor <billing@vendor.test>\r\n\
To: ap@acme.test\r\n\
Subject: Invoices\r\n\
Message-ID: <m1@vendor.test>\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XX\"\r\n\
\r\n\
--XX\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Please find attached.\r\n\
--XX\r\n\
Content-Type: application/pdf; name=\"INV-1.pdf\"\r\n\
Content-Disposition: attachment; filename=\"INV-1.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQK\r\n\
--XX\r\n\
Content-Type: application/octet-stream\r\n\
Content-Disposition: attachment; filename=\"data.csv\"\r\n\
\r\n\
a,b\r\n\
--XX--\r\n";

    #[test]
    fn test_parse_multipart_message() {
        let msg = parse_message(MULTIPART);
        assert_eq!(msg.subject, "Invoices");
        assert_eq!(msg.sender.address, "billing@vendor.test");
        assert_eq!(msg.recipients[0].address, "ap@acme.test");
        assert_eq!(msg.header("message-id"), Some("<m1@vendor.test>"));
        assert_eq!(msg.body.text.as_deref().map(str::trim), Some("Please find attached."));

        assert_eq!(msg.attachments.len(), 2);
        assert_eq!(msg.attachments[0].filename, "INV-1.pdf");
        assert_eq!(msg.attachments[0].mime_type, "application/pdf");
        assert_eq!(msg.attachments[0].content, b"%PDF-1.4\n");
        assert_eq!(msg.attachments[1].filename, "data.csv");
        assert!(!msg.attachments[1].is_pdf());
    }

    #[test]
    fn test_parse_plain_message_has_no_attachments() {
        let raw = b"From: a@b.test\nTo: c@d.test\nSubject: Hi\n\nJust text\n";
        let msg = parse_message(raw);
        assert!(msg.attachments.is_empty());
        assert_eq!(msg.body.text.as_deref().map(str::trim), Some("Just text"));
    }

    #[test]
    fn test_plain_only_message_has_no_html() {
        let raw = b"From: a@b.test\nTo: c@d.test\nSubject: Hi\n\
Content-Type: text/plain; charset=utf-8\n\nJust plain text.\n";
        let msg = parse_message(raw);
        assert_eq!(msg.body.text.as_deref().map(str::trim), Some("Just plain text."));
        assert_eq!(msg.body.html, None);
    }

    #[test]
    fn test_html_only_message_has_no_text() {
        let raw = b"From: a@b.test\nTo: c@d.test\nSubject: Hi\n\
Content-Type: text/html; charset=utf-8\n\n<p>Only <b>HTML</b></p>\n";
        let msg = parse_message(raw);
        assert_eq!(msg.body.text, None);
        assert_eq!(msg.body.html.as_deref().map(str::trim), Some("<p>Only <b>HTML</b></p>"));
    }

    #[test]
    fn test_alternative_keeps_both_parts() {
        let raw = b"From: a@b.test\r\nTo: c@d.test\r\nSubject: Hi\r\n\
Content-Type: multipart/alternative; boundary=\"AA\"\r\n\r\n\
--AA\r\nContent-Type: text/plain\r\n\r\nplain\r\n\
--AA\r\nContent-Type: text/html\r\n\r\n<p>html</p>\r\n--AA--\r\n";
        let msg = parse_message(raw);
        assert_eq!(msg.body.text.as_deref().map(str::trim), Some("plain"));
        assert_eq!(msg.body.html.as_deref().map(str::trim), Some("<p>html</p>"));
    }

    #[test]
    fn test_skip_from_line() {
        let data = b"From billing@vendor.test Thu Jan 04 10:00:00 2024\nSubject: T\n\nB\n";
        assert!(skip_from_line(data).starts_with(b"Subject:"));
        let plain = b"Subject: T\n\nB\n";
        assert_eq!(skip_from_line(plain), plain);
    }

    #[test]
    fn test_find_header_end() {
        assert_eq!(find_header_end(b"A: 1\nB: 2\n\nbody"), Some(9));
        assert_eq!(find_header_end(b"A: 1\r\nB: 2\r\n\r\nbody"), Some(10));
        assert_eq!(find_header_end(b"A: 1\n"), None);
    }

    #[test]
    fn test_body_fallback() {
        assert_eq!(body_fallback(b"A: 1\r\n\r\nhello"), "hello");
        assert_eq!(body_fallback(b"A: 1"), "");
    }
}
