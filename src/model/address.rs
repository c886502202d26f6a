//! Mailbox addresses as they appear in `From:` / `To:` headers.

use serde::{Deserialize, Serialize};

/// A single mailbox: optional display name plus the bare `user@domain`.
///
/// - `"Billing Dept <billing@acme.test>"` → `name = "Billing Dept"`, `address = "billing@acme.test"`
/// - `"ap@acme.test"` → `name = ""`, `address = "ap@acme.test"`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Human-readable display name (may be empty).
    pub name: String,
    /// The bare address.
    pub address: String,
}

impl EmailAddress {
    /// Build an address without a display name.
    pub fn bare(address: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            address: address.into(),
        }
    }

    /// Parse one mailbox from a (decoded) header value.
    ///
    /// Accepts `user@domain`, `<user@domain>`, `Name <user@domain>` and
    /// `"Quoted, Name" <user@domain>`. Anything else is kept verbatim as the address.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();

        if let (Some(open), Some(close)) = (trimmed.rfind('<'), trimmed.rfind('>')) {
            if close > open {
                return Self {
                    name: unquote(&trimmed[..open]),
                    address: trimmed[open + 1..close].trim().to_string(),
                };
            }
        }

        Self::bare(trimmed)
    }

    /// Parse a comma-separated address list, honoring quoted and bracketed commas.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        let mut out = Vec::new();
        let mut current = String::new();
        let mut quoted = false;
        let mut bracketed = false;

        for ch in raw.chars() {
            match ch {
                '"' => quoted = !quoted,
                '<' if !quoted => bracketed = true,
                '>' if !quoted => bracketed = false,
                ',' if !quoted && !bracketed => {
                    push_parsed(&mut out, &current);
                    current.clear();
                    continue;
                }
                _ => {}
            }
            current.push(ch);
        }
        push_parsed(&mut out, &current);

        out
    }

    /// `true` if the address has the `local@domain` shape.
    pub fn is_routable(&self) -> bool {
        match self.address.split_once('@') {
            Some((local, domain)) => !local.is_empty() && !domain.is_empty(),
            None => false,
        }
    }
}

fn push_parsed(out: &mut Vec<EmailAddress>, segment: &str) {
    let addr = EmailAddress::parse(segment);
    if !addr.address.is_empty() {
        out.push(addr);
    }
}

/// Trim and strip one pair of surrounding double quotes.
fn unquote(s: &str) -> String {
    let t = s.trim();
    t.strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(t)
        .trim()
        .to_string()
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{} <{}>", self.name, self.address)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare() {
        let addr = EmailAddress::parse("ap@acme.test");
        assert_eq!(addr.address, "ap@acme.test");
        assert!(addr.name.is_empty());
    }

    #[test]
    fn test_parse_named() {
        let addr = EmailAddress::parse("Billing Dept <billing@acme.test>");
        assert_eq!(addr.name, "Billing Dept");
        assert_eq!(addr.address, "billing@acme.test");
    }

    #[test]
    fn test_parse_quoted_name_with_comma() {
        let addr = EmailAddress::parse("\"Doe, Jane\" <jane@acme.test>");
        assert_eq!(addr.name, "Doe, Jane");
        assert_eq!(addr.address, "jane@acme.test");
    }

    #[test]
    fn test_parse_list_mixed() {
        let list = EmailAddress::parse_list(
            "\"Doe, Jane\" <jane@acme.test>, ap@acme.test , Books <books@acme.test>",
        );
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].name, "Doe, Jane");
        assert_eq!(list[1].address, "ap@acme.test");
        assert_eq!(list[2].name, "Books");
    }

    #[test]
    fn test_parse_list_empty() {
        assert!(EmailAddress::parse_list("  ").is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            EmailAddress::parse("Books <books@acme.test>").to_string(),
            "Books <books@acme.test>"
        );
        assert_eq!(EmailAddress::bare("a@b.test").to_string(), "a@b.test");
    }

    #[test]
    fn test_is_routable() {
        assert!(EmailAddress::bare("a@b.test").is_routable());
        assert!(!EmailAddress::bare("undisclosed-recipients:;").is_routable());
        assert!(!EmailAddress::bare("@b.test").is_routable());
    }
}
