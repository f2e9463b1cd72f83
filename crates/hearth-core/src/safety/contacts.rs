//! Emergency contacts.
//!
//! The engine only reads contacts, through [`EmergencyContactDirectory`].
//! [`StoreContactDirectory`] keeps them in the key-value store under
//! `contact/<user>/<contact id>` for the CLI and tests.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::storage::{key_segment, KeyValueStore, Repository};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyContact {
    pub contact_id: String,
    pub user_id: String,
    pub name: String,
    pub phone: String,
    pub email: String,
    pub is_primary: bool,
}

pub trait EmergencyContactDirectory: Send + Sync {
    fn list_contacts(
        &self,
        user_id: &str,
    ) -> std::result::Result<Vec<EmergencyContact>, Box<dyn std::error::Error + Send + Sync>>;
}

pub struct StoreContactDirectory {
    contacts: Repository<EmergencyContact>,
}

impl StoreContactDirectory {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            contacts: Repository::new(store, "contact"),
        }
    }

    pub fn add(
        &self,
        user_id: &str,
        name: &str,
        phone: &str,
        email: &str,
        is_primary: bool,
    ) -> Result<EmergencyContact> {
        let contact = EmergencyContact {
            contact_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            phone: phone.to_string(),
            email: email.to_string(),
            is_primary,
        };
        self.contacts
            .put(&contact_key(user_id, &contact.contact_id), &contact)?;
        Ok(contact)
    }

    pub fn remove(&self, user_id: &str, contact_id: &str) -> Result<()> {
        if self.contacts.remove(&contact_key(user_id, contact_id))? {
            Ok(())
        } else {
            Err(CoreError::not_found("contact", contact_id))
        }
    }

    /// Contacts for `user_id`, primary first.
    pub fn contacts_of(&self, user_id: &str) -> Result<Vec<EmergencyContact>> {
        let mut contacts = self.contacts.list(&format!("{}/", key_segment(user_id)))?;
        contacts.sort_by(|a, b| b.is_primary.cmp(&a.is_primary).then_with(|| a.name.cmp(&b.name)));
        Ok(contacts)
    }
}

fn contact_key(user_id: &str, contact_id: &str) -> String {
    format!("{}/{}", key_segment(user_id), key_segment(contact_id))
}

impl EmergencyContactDirectory for StoreContactDirectory {
    fn list_contacts(
        &self,
        user_id: &str,
    ) -> std::result::Result<Vec<EmergencyContact>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.contacts_of(user_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn contacts_are_per_user_and_primary_first() {
        let dir = StoreContactDirectory::new(Arc::new(MemoryStore::new()));
        dir.add("alice", "Zed", "+100", "z@example.com", false).unwrap();
        let primary = dir.add("alice", "Mum", "+101", "m@example.com", true).unwrap();
        dir.add("bob", "Bob's brother", "+102", "b@example.com", true).unwrap();

        let listed = dir.list_contacts("alice").unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0], primary);
    }

    #[test]
    fn slash_in_user_id_does_not_widen_the_listing() {
        let dir = StoreContactDirectory::new(Arc::new(MemoryStore::new()));
        dir.add("alice/evil", "Stranger", "+666", "s@example.com", true).unwrap();
        assert!(dir.list_contacts("alice").unwrap().is_empty());
        assert_eq!(dir.list_contacts("alice/evil").unwrap().len(), 1);
    }

    #[test]
    fn removing_unknown_contact_is_not_found() {
        let dir = StoreContactDirectory::new(Arc::new(MemoryStore::new()));
        let contact = dir.add("alice", "Mum", "+101", "m@example.com", true).unwrap();
        dir.remove("alice", &contact.contact_id).unwrap();
        assert!(matches!(
            dir.remove("alice", &contact.contact_id),
            Err(CoreError::NotFound { .. })
        ));
    }
}
