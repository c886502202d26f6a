//! The attachment consolidation pipeline.
//!
//! classify → merge → assemble → dispatch, one message at a time. Every
//! message runs inside its own failure boundary: an error or a panic is
//! recorded in the batch report and the next message proceeds.

pub mod assemble;
pub mod classify;
pub mod merge;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::dispatch::{DispatchMode, DispatchResult, DispatchRouter};
use crate::error::{RelayError, Result};
use crate::model::message::InboundMessage;

use self::assemble::assemble;
use self::classify::{classify, InvoicePredicate, InvoiceString};
use self::merge::{MergeOutcome, PdfMerger};

/// What happened to one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Relayed { bytes: usize },
    Simulated { folder: PathBuf },
    Failed { kind: String, error: String },
}

/// Per-message line of the batch report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageReport {
    pub subject: String,
    pub sender: String,
    pub attachments_in: usize,
    pub attachments_out: usize,
    pub pdf_candidates: usize,
    /// Filenames merged into the consolidated PDF, in page order.
    pub merged_sources: Vec<String>,
    pub merged_pages: Option<usize>,
    pub outbound_bytes: u64,
    pub outcome: Outcome,
}

impl MessageReport {
    fn new(message: &InboundMessage) -> Self {
        Self {
            subject: message.subject.clone(),
            sender: message.sender.address.clone(),
            attachments_in: message.attachments.len(),
            attachments_out: 0,
            pdf_candidates: 0,
            merged_sources: Vec::new(),
            merged_pages: None,
            outbound_bytes: 0,
            outcome: Outcome::Failed {
                kind: "not_processed".into(),
                error: String::new(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, Outcome::Failed { .. })
    }

    fn fail(&mut self, error: &RelayError) {
        self.outcome = Outcome::Failed {
            kind: error.kind().to_string(),
            error: error.to_string(),
        };
    }
}

/// Result of one run over everything the source returned.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub mode: DispatchMode,
    pub messages: Vec<MessageReport>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.messages.iter().filter(|m| m.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.messages.len() - self.succeeded()
    }

    pub fn merged(&self) -> usize {
        self.messages.iter().filter(|m| m.merged_pages.is_some()).count()
    }
}

/// Classifier, merger and router wired together.
pub struct Pipeline {
    predicate: Box<dyn InvoicePredicate>,
    merger: PdfMerger,
    router: DispatchRouter,
}

impl Pipeline {
    pub fn new(
        predicate: Box<dyn InvoicePredicate>,
        merger: PdfMerger,
        router: DispatchRouter,
    ) -> Self {
        Self {
            predicate,
            merger,
            router,
        }
    }

    /// Build from configuration; the router decides the mode.
    pub fn from_config(config: &Config, router: DispatchRouter) -> Self {
        let invoice = &config.invoice;
        Self::new(
            Box::new(InvoiceString::new(invoice.match_string.as_deref())),
            PdfMerger::new(
                invoice.min_merge_count,
                invoice.max_pdf_size,
                invoice.merged_filename.clone(),
            ),
            router,
        )
    }

    pub fn mode(&self) -> DispatchMode {
        self.router.mode()
    }

    /// Process every message, reporting progress as `(done, total)`.
    pub fn run_batch(
        &mut self,
        messages: &[InboundMessage],
        progress: &dyn Fn(usize, usize),
    ) -> BatchReport {
        let total = messages.len();
        let mut reports = Vec::with_capacity(total);

        for (i, message) in messages.iter().enumerate() {
            progress(i, total);
            reports.push(self.process(message, Local::now()));
        }
        progress(total, total);

        let report = BatchReport {
            mode: self.mode(),
            messages: reports,
        };
        info!(
            total,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Batch complete"
        );
        report
    }

    /// Process one message inside a failure boundary. Never panics, never fails.
    pub fn process(&mut self, message: &InboundMessage, now: DateTime<Local>) -> MessageReport {
        let mut report = MessageReport::new(message);

        let result = catch_unwind(AssertUnwindSafe(|| {
            self.process_inner(message, now, &mut report)
        }))
        .unwrap_or_else(|payload| Err(RelayError::Panicked(panic_message(payload.as_ref()))));

        match result {
            Ok(outcome) => {
                info!(subject = %message.subject, outcome = ?outcome, "Processed message");
                report.outcome = outcome;
            }
            Err(e) => {
                warn!(subject = %message.subject, kind = e.kind(), error = %e, "Message failed");
                report.fail(&e);
            }
        }
        report
    }

    fn process_inner(
        &mut self,
        message: &InboundMessage,
        now: DateTime<Local>,
        report: &mut MessageReport,
    ) -> Result<Outcome> {
        let classification = classify(&message.attachments, self.predicate.as_ref());
        report.pdf_candidates = classification.candidates.len();

        let merged = self.merger.merge(&classification.candidate_attachments())?;
        if let MergeOutcome::Merged(doc) = &merged {
            report.merged_sources = doc.source_order.clone();
            report.merged_pages = Some(doc.page_count);
        }

        let outbound = assemble(message, &classification, &merged, now.with_timezone(&Utc));
        report.attachments_out = outbound.attachments.len();
        report.outbound_bytes = outbound.attachment_bytes();

        Ok(match self.router.dispatch(&outbound, now)? {
            DispatchResult::Relayed { bytes } => Outcome::Relayed { bytes },
            DispatchResult::Simulated(bundle) => Outcome::Simulated {
                folder: bundle.folder,
            },
        })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
