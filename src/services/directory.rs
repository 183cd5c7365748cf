//! Person directory lookups
//!
//! The directory is the source of truth for card holders and their user
//! defined fields. The gateway only reads from it.

use crate::domain::types::IdentityId;
use crate::infra::config::PersonEntry;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::collections::HashMap;

/// A person as known to the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonRecord {
    pub first_name: String,
    pub last_name: String,
    /// User defined fields keyed by field name
    pub fields: HashMap<String, String>,
}

impl PersonRecord {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

/// Read access to person records
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// `Ok(None)` when the identity is unknown
    async fn person(&self, identity: IdentityId) -> anyhow::Result<Option<PersonRecord>>;
}

/// Directory loaded once from the `[[people]]` config tables
#[derive(Debug, Default)]
pub struct StaticDirectory {
    people: FxHashMap<IdentityId, PersonRecord>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: &[PersonEntry]) -> Self {
        let mut directory = Self::new();
        for entry in entries {
            directory.insert(
                entry.id,
                PersonRecord {
                    first_name: entry.first_name.clone(),
                    last_name: entry.last_name.clone(),
                    fields: entry.fields.clone(),
                },
            );
        }
        directory
    }

    pub fn insert(&mut self, identity: IdentityId, record: PersonRecord) {
        self.people.insert(identity, record);
    }

    pub fn len(&self) -> usize {
        self.people.len()
    }

    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }
}

#[async_trait]
impl IdentityDirectory for StaticDirectory {
    async fn person(&self, identity: IdentityId) -> anyhow::Result<Option<PersonRecord>> {
        Ok(self.people.get(&identity).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_directory_lookup() {
        let entries = vec![PersonEntry {
            id: IdentityId(42),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            fields: HashMap::from([("dh_can_open_house".to_string(), "True".to_string())]),
        }];
        let directory = StaticDirectory::from_entries(&entries);

        let person = directory.person(IdentityId(42)).await.unwrap().unwrap();
        assert_eq!(person.display_name(), "Ada Lovelace");
        assert_eq!(person.field("dh_can_open_house"), Some("True"));
        assert_eq!(person.field("missing"), None);

        assert!(directory.person(IdentityId(7)).await.unwrap().is_none());
        assert_eq!(directory.len(), 1);
    }
}
