//! Validated target lists

use crate::error::TargetParseError;
use serde::Serialize;
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// Longest hostname accepted, in bytes
const MAX_HOSTNAME_LEN: usize = 253;
/// Longest single label accepted, in bytes
const MAX_LABEL_LEN: usize = 63;

/// Ordered, duplicate-free list of IPv4 literals and hostnames
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetList(Vec<String>);

impl TargetList {
    /// Validate raw entries, keeping the first occurrence of each
    ///
    /// Entries are trimmed and blank entries skipped. Anything that is
    /// neither a dotted-quad IPv4 literal nor a syntactically valid hostname
    /// is rejected with its position.
    pub fn parse<I, S>(entries: I) -> Result<Self, TargetParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut targets = Vec::new();

        for (index, entry) in entries.into_iter().enumerate() {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            if !is_valid_target(entry) {
                return Err(TargetParseError::Invalid {
                    index,
                    target: entry.to_string(),
                });
            }
            if seen.insert(entry.to_string()) {
                targets.push(entry.to_string());
            }
        }

        if targets.is_empty() {
            return Err(TargetParseError::Empty);
        }
        Ok(Self(targets))
    }

    /// Targets in input order
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Number of targets
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for a parsed list
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume into the underlying vector
    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl AsRef<[String]> for TargetList {
    fn as_ref(&self) -> &[String] {
        &self.0
    }
}

fn is_valid_target(entry: &str) -> bool {
    entry.parse::<Ipv4Addr>().is_ok() || is_valid_hostname(entry)
}

fn is_valid_hostname(name: &str) -> bool {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() || name.len() > MAX_HOSTNAME_LEN {
        return false;
    }
    // All-numeric dotted names are malformed addresses, not hostnames
    if name.split('.').all(|l| l.chars().all(|c| c.is_ascii_digit())) {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keeps_order_and_drops_duplicates() {
        let list =
            TargetList::parse(["example.com", "1.1.1.1", "example.com", " 8.8.8.8 "]).unwrap();
        assert_eq!(list.as_slice(), ["example.com", "1.1.1.1", "8.8.8.8"]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_parse_rejects_invalid_entries() {
        let err = TargetList::parse(["1.1.1.1", "not a valid host###"]).unwrap_err();
        assert_eq!(
            err,
            TargetParseError::Invalid {
                index: 1,
                target: "not a valid host###".to_string()
            }
        );
        assert!(TargetList::parse(["300.1.1.1"]).is_err());
        assert!(TargetList::parse(["-bad.example"]).is_err());
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(TargetList::parse(Vec::<String>::new()), Err(TargetParseError::Empty));
        assert_eq!(TargetList::parse(["", "  "]), Err(TargetParseError::Empty));
    }

    #[test]
    fn test_hostname_rules() {
        assert!(is_valid_hostname("localhost"));
        assert!(is_valid_hostname("a-b.example.com."));
        assert!(is_valid_hostname("_sip.example.com"));
        assert!(!is_valid_hostname("a..b"));
        assert!(!is_valid_hostname(&"a".repeat(64)));
    }
}
