//! Reader for individual `.eml` files (RFC 5322 messages without mbox framing).

use std::path::Path;

use crate::error::{RelayError, Result};
use crate::model::message::InboundMessage;
use crate::parser::mime;

/// Read and parse a single `.eml` file.
pub fn read_eml(path: impl AsRef<Path>) -> Result<InboundMessage> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| RelayError::io(path, e))?;

    if mime::find_header_end(&data).is_none() && !looks_like_headers(&data) {
        return Err(RelayError::Source {
            path: path.to_path_buf(),
            reason: "no RFC 5322 header block found".into(),
        });
    }

    Ok(mime::parse_message(&data))
}

/// A headers-only message is still valid; reject files whose first line is not a field.
fn looks_like_headers(data: &[u8]) -> bool {
    let first_line = data.split(|&b| b == b'\n').next().unwrap_or_default();
    let text = String::from_utf8_lossy(first_line);
    matches!(text.split_once(':'), Some((name, _)) if !name.is_empty() && !name.contains(' '))
}
