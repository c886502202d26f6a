//! Email parsing: header decoding, MIME decoding, `.eml` files and mbox spools.

pub mod eml;
pub mod header;
pub mod mbox;
pub mod mime;
