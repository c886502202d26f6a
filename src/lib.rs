//! `invoice-relay`: merge the invoice PDFs of incoming mail into one
//! document per message, then relay the message or simulate the relay on disk.
//!
//! The library holds the whole pipeline: mail sources, MIME parsing, PDF
//! merging, message assembly and dispatch. The binary only wires
//! configuration, logging and reporting around it.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod source;
