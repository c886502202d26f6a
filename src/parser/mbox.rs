//! Split an mbox spool into individual messages.
//!
//! Spools written by a local MDA are small enough to read whole; messages are
//! cut at `From ` lines that start the file or follow a blank line, and
//! `>From ` quoting in bodies is undone.

use tracing::warn;

/// One message sliced out of an mbox buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MboxMessage {
    /// Byte offset of the `From ` separator line.
    pub offset: usize,
    /// Message bytes without the separator line, `>From ` unescaped.
    pub raw: Vec<u8>,
}

/// Split a whole mbox buffer into messages.
pub fn split_mbox(data: &[u8]) -> Vec<MboxMessage> {
    let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);

    let mut messages = Vec::new();
    let mut current: Option<MboxMessage> = None;
    let mut prev_blank = true;
    let mut offset = 0usize;

    for line in data.split_inclusive(|&b| b == b'\n') {
        let line_start = offset;
        offset += line.len();

        if line.starts_with(b"From ") {
            if !prev_blank {
                warn!(
                    offset = line_start,
                    "Found 'From ' separator without preceding blank line"
                );
            }
            if let Some(done) = current.take() {
                messages.push(done);
            }
            current = Some(MboxMessage {
                offset: line_start,
                raw: Vec::new(),
            });
            prev_blank = false;
            continue;
        }

        prev_blank = line.iter().all(|b| b.is_ascii_whitespace());

        match current.as_mut() {
            Some(msg) => msg.raw.extend_from_slice(unescape_from(line)),
            None if !prev_blank => {
                warn!(offset = line_start, "Data before first 'From ' separator, skipping");
            }
            None => {}
        }
    }

    if let Some(done) = current {
        messages.push(done);
    }
    messages
}

/// `>From ` → `From `, `>>From ` → `>From `, per mboxrd.
fn unescape_from(line: &[u8]) -> &[u8] {
    let quotes = line.iter().take_while(|&&b| b == b'>').count();
    if quotes > 0 && line[quotes..].starts_with(b"From ") {
        &line[1..]
    } else {
        line
    }
}

/// `true` if the buffer starts like an mbox file.
pub fn is_mbox(data: &[u8]) -> bool {
    data.strip_prefix(&[0xEF, 0xBB, 0xBF])
        .unwrap_or(data)
        .starts_with(b"From ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPOOL: &[u8] = b"From billing@vendor.test Thu Jan  4 10:00:00 2024\n\
Subject: One\n\
\n\
>From the desk of billing\n\
\n\
From ap@corp.test Fri Jan  5 11:00:00 2024\n\
Subject: Two\n\
\n\
Body two\n";

    #[test]
    fn test_split_two_messages() {
        let msgs = split_mbox(SPOOL);
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].raw.starts_with(b"Subject: One"));
        assert!(msgs[1].raw.starts_with(b"Subject: Two"));
        assert_eq!(msgs[0].offset, 0);
    }

    #[test]
    fn test_from_quoting_is_undone() {
        let msgs = split_mbox(SPOOL);
        let body = String::from_utf8_lossy(&msgs[0].raw);
        assert!(body.contains("\nFrom the desk of billing\n"));
        assert!(!body.contains(">From"));
    }

    #[test]
    fn test_empty_spool() {
        assert!(split_mbox(b"").is_empty());
        assert!(!is_mbox(b""));
    }

    #[test]
    fn test_unescape_nested_quote() {
        assert_eq!(unescape_from(b">>From x\n"), b">From x\n");
        assert_eq!(unescape_from(b">quoted\n"), b">quoted\n");
    }
}
