//! Split a message's attachments into invoice candidates and everything else.

use crate::model::attachment::Attachment;

/// Decides whether a PDF filename is a priority invoice.
pub trait InvoicePredicate {
    fn is_invoice(&self, filename: &str) -> bool;
}

impl<F: Fn(&str) -> bool> InvoicePredicate for F {
    fn is_invoice(&self, filename: &str) -> bool {
        self(filename)
    }
}

/// Case-insensitive substring match against the configured invoice string.
///
/// An unset or blank string matches nothing, so no PDF is promoted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvoiceString(Option<String>);

impl InvoiceString {
    pub fn new(raw: Option<&str>) -> Self {
        Self(
            raw.map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_lowercase),
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl InvoicePredicate for InvoiceString {
    fn is_invoice(&self, filename: &str) -> bool {
        match &self.0 {
            Some(needle) => filename.to_lowercase().contains(needle.as_str()),
            None => false,
        }
    }
}

/// An attachment together with its position in the inbound message.
#[derive(Debug, Clone, Copy)]
pub struct Classified<'a> {
    pub index: usize,
    pub attachment: &'a Attachment,
}

/// Result of [`classify`]. Borrows from the inbound message.
#[derive(Debug, Clone, Default)]
pub struct Classification<'a> {
    /// PDFs in merge order: predicate matches first, then the rest, each in MIME order.
    pub candidates: Vec<Classified<'a>>,
    /// Non-PDF attachments in MIME order.
    pub others: Vec<Classified<'a>>,
}

impl<'a> Classification<'a> {
    /// Candidate attachments in merge order.
    pub fn candidate_attachments(&self) -> Vec<&'a Attachment> {
        self.candidates.iter().map(|c| c.attachment).collect()
    }

    /// Smallest original index among the candidates.
    pub fn first_candidate_index(&self) -> Option<usize> {
        self.candidates.iter().map(|c| c.index).min()
    }

    pub fn has_candidates(&self) -> bool {
        !self.candidates.is_empty()
    }
}

/// Classify attachments. Pure; never reorders `others`.
pub fn classify<'a>(
    attachments: &'a [Attachment],
    predicate: &dyn InvoicePredicate,
) -> Classification<'a> {
    let mut priority = Vec::new();
    let mut rest = Vec::new();
    let mut others = Vec::new();

    for (index, attachment) in attachments.iter().enumerate() {
        let entry = Classified { index, attachment };
        if !attachment.is_pdf() {
            others.push(entry);
        } else if predicate.is_invoice(&attachment.filename) {
            priority.push(entry);
        } else {
            rest.push(entry);
        }
    }

    priority.extend(rest);
    Classification {
        candidates: priority,
        others,
    }
}
