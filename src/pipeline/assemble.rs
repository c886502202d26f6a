//! Build the outbound message from the inbound one and the merge result.

use chrono::{DateTime, Utc};

use crate::model::message::{HeaderField, InboundMessage, OutboundMessage};
use crate::pipeline::classify::Classification;
use crate::pipeline::merge::MergeOutcome;

/// Headers that describe the inbound MIME tree or are rendered from typed fields.
const RENDERED_HEADERS: &[&str] = &[
    "content-type",
    "content-transfer-encoding",
    "content-length",
    "content-disposition",
    "mime-version",
    "from",
    "to",
    "subject",
    "date",
];

/// Rebuild `original` with the merged PDF in place of the invoice candidates.
///
/// On `Merged`, the merged attachment takes the position of the first
/// candidate and the remaining candidates are dropped. On `PassThrough`,
/// every attachment is kept as received.
pub fn assemble(
    original: &InboundMessage,
    classification: &Classification<'_>,
    outcome: &MergeOutcome,
    processed_at: DateTime<Utc>,
) -> OutboundMessage {
    let attachments = match outcome {
        MergeOutcome::PassThrough => original.attachments.clone(),
        MergeOutcome::Merged(merged) => {
            let first = classification.first_candidate_index();
            let mut out = Vec::with_capacity(classification.others.len() + 1);
            for (index, attachment) in original.attachments.iter().enumerate() {
                if Some(index) == first {
                    out.push(merged.to_attachment());
                } else if !classification.candidates.iter().any(|c| c.index == index) {
                    out.push(attachment.clone());
                }
            }
            out
        }
    };

    OutboundMessage {
        subject: original.subject.clone(),
        sender: original.sender.clone(),
        recipients: original.recipients.clone(),
        headers: copied_headers(&original.headers),
        date: original.date.unwrap_or(processed_at),
        body: original.body.clone(),
        attachments,
    }
}

fn copied_headers(headers: &[HeaderField]) -> Vec<HeaderField> {
    headers
        .iter()
        .filter(|h| !RENDERED_HEADERS.iter().any(|name| h.is(name)))
        .cloned()
        .collect()
}
