//! Core data model: messages, addresses, and attachments.

pub mod address;
pub mod attachment;
pub mod message;

pub use address::EmailAddress;
pub use attachment::Attachment;
pub use message::{Body, HeaderField, InboundMessage, OutboundMessage};
