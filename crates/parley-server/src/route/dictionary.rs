//! Static route-name to numeric-code dictionary.
//!
//! Only the gateway uses it: clients may send a code instead of a route
//! name, and the handshake reply advertises the table. Names are kept
//! verbatim since push routes such as `onMessage` are case-sensitive on
//! the client side.

use std::collections::{BTreeMap, HashMap};

use super::RouteError;

/// Bidirectional route/code table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteDictionary {
    by_name: BTreeMap<String, u16>,
    by_code: HashMap<u16, String>,
}

impl RouteDictionary {
    /// Build from a name-to-code map, rejecting shared codes.
    pub fn from_map(entries: BTreeMap<String, u16>) -> Result<Self, RouteError> {
        let mut by_code: HashMap<u16, String> = HashMap::with_capacity(entries.len());
        for (name, code) in &entries {
            if name.trim().is_empty() {
                return Err(RouteError::Invalid {
                    name: name.clone(),
                    reason: "dictionary names must not be empty",
                });
            }
            if let Some(first) = by_code.insert(*code, name.clone()) {
                return Err(RouteError::DuplicateCode {
                    code: *code,
                    first,
                    second: name.clone(),
                });
            }
        }
        Ok(Self {
            by_name: entries,
            by_code,
        })
    }

    /// Code for a route name.
    pub fn code(&self, name: &str) -> Option<u16> {
        self.by_name.get(name).copied()
    }

    /// Route name for a code.
    pub fn route(&self, code: u16) -> Option<&str> {
        self.by_code.get(&code).map(String::as_str)
    }

    /// The full table, ordered by name.
    pub fn entries(&self) -> &BTreeMap<String, u16> {
        &self.by_name
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether the dictionary is empty.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn entries(pairs: &[(&str, u16)]) -> BTreeMap<String, u16> {
        pairs.iter().map(|(n, c)| ((*n).to_owned(), *c)).collect()
    }

    #[test]
    fn lookups_both_ways() {
        let dict = RouteDictionary::from_map(entries(&[
            ("connector.getsessiondata", 1),
            ("onMessage", 4),
        ]))
        .unwrap();
        assert_eq!(dict.code("connector.getsessiondata"), Some(1));
        assert_eq!(dict.route(4), Some("onMessage"));
        assert_eq!(dict.route(9), None);
        assert_eq!(dict.len(), 2);
    }

    #[test]
    fn shared_code_rejected() {
        let err = RouteDictionary::from_map(entries(&[("a.b", 1), ("c.d", 1)])).unwrap_err();
        assert_matches!(err, RouteError::DuplicateCode { code: 1, .. });
    }

    #[test]
    fn empty_name_rejected() {
        assert_matches!(
            RouteDictionary::from_map(entries(&[(" ", 1)])),
            Err(RouteError::Invalid { .. })
        );
    }
}
