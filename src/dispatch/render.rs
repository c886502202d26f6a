//! Render an [`OutboundMessage`] to RFC 5322 bytes with `lettre`.
//!
//! The output depends only on the message: boundaries are derived from a
//! SHA-256 of its content and the `Date:` comes from the message itself.

use std::io::Write;
use std::time::SystemTime;

use lettre::address::Envelope;
use lettre::message::header::{ContentType, HeaderName, HeaderValue, Headers};
use lettre::message::{Attachment as AttachmentPart, Mailbox, MultiPart, SinglePart};
use lettre::{Address, Message};
use sha2::{Digest, Sha256};

use crate::error::{RelayError, Result};
use crate::model::address::EmailAddress;
use crate::model::attachment::DEFAULT_MIME;
use crate::model::message::{Body, OutboundMessage};

/// Wire bytes plus the SMTP envelope derived from `From:` / `To:`.
#[derive(Debug, Clone)]
pub struct RenderedMessage {
    pub bytes: Vec<u8>,
    pub envelope: Envelope,
}

impl RenderedMessage {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Render `message`. Fails with `InvalidMessage` on unusable addresses or headers.
pub fn render(message: &OutboundMessage) -> Result<RenderedMessage> {
    if message.recipients.is_empty() {
        return Err(RelayError::InvalidMessage(format!(
            "'{}' has no recipients",
            message.subject
        )));
    }

    let from = mailbox(&message.sender)?;
    let to: Vec<Mailbox> = message
        .recipients
        .iter()
        .map(mailbox)
        .collect::<Result<_>>()?;
    let envelope = Envelope::new(
        Some(from.email.clone()),
        to.iter().map(|m| m.email.clone()).collect(),
    )
    .map_err(|e| RelayError::InvalidMessage(e.to_string()))?;

    let mut builder = Message::builder()
        .envelope(envelope)
        .from(from)
        .subject(message.subject.clone())
        .date(SystemTime::from(message.date));
    for mbox in to {
        builder = builder.to(mbox);
    }

    let boundary = boundary_for(message);
    let message_id = message
        .header("Message-ID")
        .map(str::to_string)
        .unwrap_or_else(|| format!("<{}@invoice-relay>", &boundary[8..]));
    builder = builder.message_id(Some(message_id));
    let copied = copied_headers(message)?;

    let built = if message.attachments.is_empty() {
        match body_part(&message.body, &boundary) {
            BodyPart::Single(part) => builder.singlepart(part),
            BodyPart::Alternative(part) => builder.multipart(part),
        }
    } else {
        let mut mixed = match body_part(&message.body, &boundary) {
            BodyPart::Single(part) => MultiPart::mixed().boundary(boundary.clone()).singlepart(part),
            BodyPart::Alternative(part) => {
                MultiPart::mixed().boundary(boundary.clone()).multipart(part)
            }
        };
        for attachment in &message.attachments {
            let content_type = content_type(&attachment.mime_type)?;
            mixed = mixed.singlepart(
                AttachmentPart::new(attachment.filename.clone())
                    .body(attachment.content.clone(), content_type),
            );
        }
        builder.multipart(mixed)
    };

    let email = built.map_err(|e| RelayError::InvalidMessage(e.to_string()))?;
    let mut bytes = copied;
    bytes.extend_from_slice(&email.formatted());
    Ok(RenderedMessage {
        bytes,
        envelope: email.envelope().clone(),
    })
}

/// The original headers, in order and with repeats, as wire lines.
///
/// `Headers` keeps one value per name, so each field is encoded on its own.
fn copied_headers(message: &OutboundMessage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for field in message.headers.iter().filter(|h| !h.is("Message-ID")) {
        let name = HeaderName::new_from_ascii(field.name.clone()).map_err(|e| {
            RelayError::InvalidMessage(format!("header '{}': {e}", field.name))
        })?;
        let mut single = Headers::new();
        single.insert_raw(HeaderValue::new(name, field.value.clone()));
        write!(out, "{single}")?;
    }
    Ok(out)
}

enum BodyPart {
    Single(SinglePart),
    Alternative(MultiPart),
}

fn body_part(body: &Body, boundary: &str) -> BodyPart {
    match (&body.text, &body.html) {
        (Some(text), Some(html)) => BodyPart::Alternative(
            MultiPart::alternative()
                .boundary(format!("{boundary}_alt"))
                .singlepart(SinglePart::plain(text.clone()))
                .singlepart(SinglePart::html(html.clone())),
        ),
        (None, Some(html)) => BodyPart::Single(SinglePart::html(html.clone())),
        (text, None) => BodyPart::Single(SinglePart::plain(text.clone().unwrap_or_default())),
    }
}

fn mailbox(addr: &EmailAddress) -> Result<Mailbox> {
    let email: Address = addr
        .address
        .parse()
        .map_err(|e| RelayError::InvalidMessage(format!("address '{}': {e}", addr.address)))?;
    let name = Some(addr.name.clone()).filter(|n| !n.is_empty());
    Ok(Mailbox::new(name, email))
}

fn content_type(mime: &str) -> Result<ContentType> {
    ContentType::parse(mime)
        .or_else(|_| ContentType::parse(DEFAULT_MIME))
        .map_err(|e| RelayError::InvalidMessage(format!("content type '{mime}': {e}")))
}

/// MIME boundary that is a pure function of the message content.
fn boundary_for(message: &OutboundMessage) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message.subject.as_bytes());
    hasher.update(message.date.timestamp().to_be_bytes());
    for part in [&message.body.text, &message.body.html] {
        hasher.update(part.as_deref().unwrap_or_default().as_bytes());
    }
    for attachment in &message.attachments {
        hasher.update(attachment.filename.as_bytes());
        hasher.update((attachment.content.len() as u64).to_be_bytes());
        hasher.update(&attachment.content);
    }
    let hash = format!("{:x}", hasher.finalize());
    format!("=_relay_{}", &hash[..32])
}
