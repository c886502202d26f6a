//! Concatenate invoice PDFs into a single document with `lopdf`.
//!
//! Every source is renumbered into a shared object space, its page tree is
//! discarded and its pages are re-parented under one new `/Pages` node in
//! candidate order. Attributes a page inherited from its old tree are copied
//! onto the page first so dimensions and resources survive the move.

use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::debug;

use crate::error::{RelayError, Result};
use crate::model::attachment::{Attachment, PDF_MIME};

/// Page attributes a `/Page` may inherit from its ancestors.
const INHERITABLE: &[&[u8]] = &[b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Object types that belong to a source's document structure, not its pages.
const STRUCTURAL_TYPES: &[&str] = &[
    "Catalog", "Pages", "Page", "Outlines", "Outline", "XRef", "ObjStm",
];

/// Guard against `/Parent` cycles in hostile files.
const MAX_TREE_DEPTH: usize = 32;

/// The consolidated attachment that replaces the invoice candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedDocument {
    pub filename: String,
    pub content: Vec<u8>,
    /// Filenames of the merged inputs, in page order.
    pub source_order: Vec<String>,
    pub page_count: usize,
}

impl MergedDocument {
    pub fn to_attachment(&self) -> Attachment {
        Attachment::new(self.filename.clone(), PDF_MIME, self.content.clone())
    }
}

/// What the merger decided for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Too few candidates; attachments go out as received.
    PassThrough,
    Merged(MergedDocument),
}

/// PDF merge settings.
#[derive(Debug, Clone)]
pub struct PdfMerger {
    min_count: usize,
    max_input_size: u64,
    output_name: String,
}

impl Default for PdfMerger {
    fn default() -> Self {
        Self {
            min_count: 2,
            max_input_size: 50 * 1024 * 1024,
            output_name: "merged_invoice.pdf".to_string(),
        }
    }
}

impl PdfMerger {
    pub fn new(min_count: usize, max_input_size: u64, output_name: impl Into<String>) -> Self {
        Self {
            min_count: min_count.max(2),
            max_input_size,
            output_name: output_name.into(),
        }
    }

    pub fn min_count(&self) -> usize {
        self.min_count
    }

    /// Merge `candidates` in the given order, or pass through if there are too few.
    pub fn merge(&self, candidates: &[&Attachment]) -> Result<MergeOutcome> {
        if candidates.len() < self.min_count {
            return Ok(MergeOutcome::PassThrough);
        }

        let mut output = Document::with_version("1.5");
        let mut pages: Vec<(ObjectId, Dictionary)> = Vec::new();
        let mut next_id: u32 = 1;

        for attachment in candidates {
            let mut doc = self.load(attachment)?;
            doc.renumber_objects_with(next_id);
            next_id = doc.max_id + 1;

            let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
            if page_ids.is_empty() {
                return Err(RelayError::malformed(&attachment.filename, "document has no pages"));
            }
            for page_id in page_ids {
                let page = flattened_page(&doc, page_id)
                    .map_err(|e| RelayError::malformed(&attachment.filename, e))?;
                pages.push((page_id, page));
            }

            let info_id = doc
                .trailer
                .get(b"Info")
                .and_then(Object::as_reference)
                .ok();
            for (object_id, object) in doc.objects {
                if Some(object_id) == info_id {
                    continue;
                }
                let type_name = object.type_name().unwrap_or("");
                if !STRUCTURAL_TYPES.contains(&type_name) {
                    output.objects.insert(object_id, object);
                }
            }
        }

        output.max_id = next_id;
        let pages_id = output.new_object_id();
        let kids: Vec<Object> = pages.iter().map(|(id, _)| Object::Reference(*id)).collect();
        let page_count = pages.len();

        for (page_id, mut page) in pages {
            page.set("Parent", Object::Reference(pages_id));
            output.objects.insert(page_id, Object::Dictionary(page));
        }

        output.objects.insert(
            pages_id,
            Object::Dictionary(Dictionary::from_iter([
                ("Type", Object::Name(b"Pages".to_vec())),
                ("Kids", Object::Array(kids)),
                ("Count", Object::Integer(page_count as i64)),
            ])),
        );
        let catalog_id = output.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(pages_id)),
        ]));
        output.trailer.set("Root", Object::Reference(catalog_id));
        output.renumber_objects();

        let mut content = Vec::new();
        output
            .save_to(&mut content)
            .map_err(|e| RelayError::MergeFailure(format!("cannot serialize merged PDF: {e}")))?;

        let source_order: Vec<String> = candidates.iter().map(|a| a.filename.clone()).collect();
        debug!(sources = ?source_order, pages = page_count, "Merged invoice PDFs");

        Ok(MergeOutcome::Merged(MergedDocument {
            filename: self.output_name.clone(),
            content,
            source_order,
            page_count,
        }))
    }

    fn load(&self, attachment: &Attachment) -> Result<Document> {
        if attachment.size() > self.max_input_size {
            return Err(RelayError::MergeFailure(format!(
                "'{}' is {} bytes, limit is {}",
                attachment.filename,
                attachment.size(),
                self.max_input_size
            )));
        }
        let doc = Document::load_mem(&attachment.content)
            .map_err(|e| RelayError::malformed(&attachment.filename, e))?;
        // `load_mem` never decrypts; objects of an encrypted file stay ciphertext.
        if doc.is_encrypted() {
            return Err(RelayError::MergeFailure(format!(
                "'{}' is encrypted",
                attachment.filename
            )));
        }
        Ok(doc)
    }
}

/// Clone a page dictionary with inherited attributes made explicit.
fn flattened_page(doc: &Document, page_id: ObjectId) -> std::result::Result<Dictionary, String> {
    let mut page = doc
        .get_dictionary(page_id)
        .map_err(|e| format!("page {page_id:?}: {e}"))?
        .clone();

    for &key in INHERITABLE {
        if page.has(key) {
            continue;
        }
        if let Some(value) = inherited(doc, &page, key) {
            page.set(key, value);
        }
    }
    Ok(page)
}

fn inherited(doc: &Document, page: &Dictionary, key: &[u8]) -> Option<Object> {
    let mut parent_id = page.get(b"Parent").and_then(Object::as_reference).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        let node = doc.get_dictionary(parent_id).ok()?;
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
        parent_id = node.get(b"Parent").and_then(Object::as_reference).ok()?;
    }
    None
}
