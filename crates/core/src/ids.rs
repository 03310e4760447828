// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifier newtypes.
//!
//! Thin wrappers around `String` so repo/worker/holder identifiers aren't
//! passed around as bare strings. Each supports `Borrow<str>` so they can be
//! used as `HashMap` keys and looked up by `&str` without allocating.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

macro_rules! string_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }
    };
}

string_id!(RepoId, "Unique identifier for a configured repository.");
string_id!(WorkerName, "Unique worker name, e.g. `orchestrator-dynamic-acme-repo-1700000000`.");
string_id!(HolderId, "Unique identifier for an orchestrator instance competing for leadership.");
string_id!(ContainerId, "Opaque container identifier returned by the ContainerEngine.");
string_id!(ProviderWorkerId, "Opaque worker identifier assigned by the Provider on registration.");

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn borrow_str_allows_lookup_by_reference() {
        let mut map: HashMap<WorkerName, u32> = HashMap::new();
        map.insert(WorkerName::new("orchestrator-dedicated-acme"), 1);
        assert_eq!(map.get("orchestrator-dedicated-acme"), Some(&1));
    }

    #[test]
    fn display_matches_inner_string() {
        let id = RepoId::new("acme/widgets");
        assert_eq!(id.to_string(), "acme/widgets");
    }
}
