//! Session and server identities.
//!
//! Both are string newtypes so one can never be passed where the other is
//! expected. Generated ids are UUID v7, which sort by creation time.

use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Fresh time-ordered id.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            /// The id as text.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }
    };
}

string_id!(
    /// One client connection's session.
    SessionId
);

string_id!(
    /// One server process in a cluster.
    ServerId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_parse_as_v7() {
        let id = SessionId::new();
        let parsed = Uuid::parse_str(id.as_str()).unwrap();
        assert_eq!(parsed.get_version_num(), 7);
        assert_ne!(id, SessionId::new());
    }

    #[test]
    fn later_ids_sort_after_earlier_ones() {
        let first = SessionId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(first < SessionId::new());
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = ServerId::from("room-1");
        assert_eq!(serde_json::to_value(&id).unwrap(), serde_json::json!("room-1"));
        let back: ServerId = serde_json::from_str("\"room-1\"").unwrap();
        assert_eq!(back, id);
        assert!(back.starts_with("room"));
    }
}
