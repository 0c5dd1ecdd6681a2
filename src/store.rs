//! Storage seam used by the identity resolver
//!
//! The resolver only needs five operations. `rusqlite::Connection`
//! implements them directly, and since `rusqlite::Transaction` derefs to a
//! connection the same implementation runs inside a transaction.

use rusqlite::Connection;

use crate::db::contacts;
use crate::db::{ContactId, ContactRow, LinkPrecedence, NewContact};
use crate::error::StorageError;

/// Contact storage collaborator
pub trait ContactStore {
    /// Live contacts whose email or phone number matches, oldest first
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<ContactRow>, StorageError>;

    /// The contact with `id` plus every contact linked to it, oldest first
    fn find_by_id_or_linked_id(&self, id: ContactId) -> Result<Vec<ContactRow>, StorageError>;

    /// Live contacts linked to any of `parent_ids`
    fn find_linked_to(&self, parent_ids: &[ContactId]) -> Result<Vec<ContactRow>, StorageError>;

    /// Persist a new contact; storage assigns `id` and `created_at`
    fn insert(&self, contact: NewContact) -> Result<ContactRow, StorageError>;

    /// Change a contact's precedence and link target
    fn update_precedence(
        &self,
        id: ContactId,
        precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> Result<(), StorageError>;
}

impl ContactStore for Connection {
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<ContactRow>, StorageError> {
        contacts::find_by_email_or_phone(self, email, phone_number)
    }

    fn find_by_id_or_linked_id(&self, id: ContactId) -> Result<Vec<ContactRow>, StorageError> {
        contacts::find_by_id_or_linked_id(self, id)
    }

    fn find_linked_to(&self, parent_ids: &[ContactId]) -> Result<Vec<ContactRow>, StorageError> {
        contacts::find_linked_to(self, parent_ids)
    }

    fn insert(&self, contact: NewContact) -> Result<ContactRow, StorageError> {
        contacts::insert_contact(self, &contact)
    }

    fn update_precedence(
        &self,
        id: ContactId,
        precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> Result<(), StorageError> {
        contacts::update_precedence(self, id, precedence, linked_id)
    }
}

impl<S: ContactStore + ?Sized> ContactStore for &S {
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<ContactRow>, StorageError> {
        (**self).find_by_email_or_phone(email, phone_number)
    }

    fn find_by_id_or_linked_id(&self, id: ContactId) -> Result<Vec<ContactRow>, StorageError> {
        (**self).find_by_id_or_linked_id(id)
    }

    fn find_linked_to(&self, parent_ids: &[ContactId]) -> Result<Vec<ContactRow>, StorageError> {
        (**self).find_linked_to(parent_ids)
    }

    fn insert(&self, contact: NewContact) -> Result<ContactRow, StorageError> {
        (**self).insert(contact)
    }

    fn update_precedence(
        &self,
        id: ContactId,
        precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> Result<(), StorageError> {
        (**self).update_precedence(id, precedence, linked_id)
    }
}
