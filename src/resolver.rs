//! Identity resolution - links an incoming email/phone pair into a contact cluster
//!
//! A cluster is one primary contact plus the secondaries linked directly to
//! it. Resolving an identity either creates a new primary, attaches a new
//! secondary to an existing cluster, or merges several clusters under the
//! oldest primary among them.
//!
//! ```text
//!   lookup by email OR phone
//!        │
//!        ├── no match ──────────────► insert primary
//!        │
//!        └── matches ─► primaries of the matched clusters
//!                         │
//!                         ├── oldest wins (created_at, then id)
//!                         ├── every other primary and all of its
//!                         │   descendants relink to the winner
//!                         ├── fetch the winner's cluster, flattening
//!                         │   any chains hanging below its secondaries
//!                         └── unseen email or phone ─► insert secondary
//! ```
//!
//! The resolver performs no compensation when a later write fails. Callers
//! that need atomicity run it on a transaction (see `IdentifyService`).

use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::db::{ContactId, ContactRow, LinkPrecedence, NewContact};
use crate::error::{ResolveError, StorageError};
use crate::store::ContactStore;

/// Consolidated view of one contact cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactGroupView {
    pub primary_contact_id: ContactId,
    pub emails: Vec<String>,
    pub phone_numbers: Vec<String>,
    pub secondary_contact_ids: Vec<ContactId>,
}

impl ContactGroupView {
    /// Build the view for `primary` and its cluster members
    ///
    /// The primary's own email and phone come first, the rest follow in
    /// cluster order with duplicates dropped.
    pub fn from_cluster(primary: &ContactRow, members: &[ContactRow]) -> Self {
        let mut emails = Vec::new();
        let mut phone_numbers = Vec::new();
        let mut secondary_contact_ids = Vec::new();

        push_unique(&mut emails, primary.email.as_deref());
        push_unique(&mut phone_numbers, primary.phone_number.as_deref());

        for member in members {
            push_unique(&mut emails, member.email.as_deref());
            push_unique(&mut phone_numbers, member.phone_number.as_deref());

            if member.link_precedence == LinkPrecedence::Secondary {
                secondary_contact_ids.push(member.id);
            }
        }

        Self {
            primary_contact_id: primary.id,
            emails,
            phone_numbers,
            secondary_contact_ids,
        }
    }
}

fn push_unique(values: &mut Vec<String>, value: Option<&str>) {
    if let Some(value) = value {
        if !values.iter().any(|v| v == value) {
            values.push(value.to_string());
        }
    }
}

/// A losing primary folded into the winning cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMerge {
    pub primary_id: ContactId,
    pub demoted_id: ContactId,
    /// Former descendants of the demoted primary, now linked to `primary_id`
    pub relinked_ids: Vec<ContactId>,
}

/// Outcome of a resolve call, including the writes it made
#[derive(Debug, Clone)]
pub struct Resolution {
    pub view: ContactGroupView,
    pub inserted: Option<ContactRow>,
    pub merges: Vec<ClusterMerge>,
    /// Secondaries relinked to the primary because they sat in a chain
    pub flattened: Vec<ContactId>,
}

impl Resolution {
    /// True when the call changed nothing in storage
    pub fn is_noop(&self) -> bool {
        self.inserted.is_none() && self.merges.is_empty() && self.flattened.is_empty()
    }
}

/// Identity resolver over any contact store
pub struct IdentityResolver<S> {
    store: S,
}

impl<S: ContactStore> IdentityResolver<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Resolve an identity and return its consolidated contact view
    pub fn resolve(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<ContactGroupView, ResolveError> {
        self.resolve_detailed(email, phone_number).map(|resolution| resolution.view)
    }

    /// Resolve an identity, reporting every insert and merge performed
    pub fn resolve_detailed(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Resolution, ResolveError> {
        let email = present(email);
        let phone_number = present(phone_number);

        if email.is_none() && phone_number.is_none() {
            return Err(ResolveError::MissingIdentity);
        }

        let matches = self.store.find_by_email_or_phone(email, phone_number)?;

        if matches.is_empty() {
            let created = self.store.insert(NewContact::primary(email, phone_number))?;
            info!(id = created.id, "Created primary contact");

            return Ok(Resolution {
                view: ContactGroupView::from_cluster(&created, std::slice::from_ref(&created)),
                inserted: Some(created),
                merges: Vec::new(),
                flattened: Vec::new(),
            });
        }

        let mut primaries = self.primaries_of(&matches)?.into_iter();
        let root = primaries
            .next()
            .ok_or_else(|| StorageError::Integrity("matched contacts have no primary".into()))?;

        let mut merges = Vec::new();
        for loser in primaries {
            merges.push(self.merge_into(&root, &loser)?);
        }

        let mut cluster = self.store.find_by_id_or_linked_id(root.id)?;
        let flattened = self.flatten_chains(root.id, &cluster)?;
        if !flattened.is_empty() {
            cluster = self.store.find_by_id_or_linked_id(root.id)?;
        }

        let root = cluster
            .iter()
            .find(|member| member.id == root.id)
            .cloned()
            .ok_or_else(|| {
                StorageError::Integrity(format!("primary contact {} vanished", root.id))
            })?;

        let inserted = if has_new_information(&cluster, email, phone_number) {
            let created = self
                .store
                .insert(NewContact::secondary(email, phone_number, root.id))?;
            info!(id = created.id, primary_id = root.id, "Created secondary contact");
            cluster.push(created.clone());
            Some(created)
        } else {
            debug!(primary_id = root.id, "Identity already known to cluster");
            None
        };

        Ok(Resolution {
            view: ContactGroupView::from_cluster(&root, &cluster),
            inserted,
            merges,
            flattened,
        })
    }

    /// Distinct primaries owning the matched contacts, oldest first
    fn primaries_of(&self, matches: &[ContactRow]) -> Result<Vec<ContactRow>, StorageError> {
        let mut by_id: BTreeMap<ContactId, ContactRow> = BTreeMap::new();

        for contact in matches {
            if contact.is_primary() {
                by_id.entry(contact.id).or_insert_with(|| contact.clone());
                continue;
            }
            if matches!(contact.linked_id, Some(id) if by_id.contains_key(&id)) {
                continue;
            }
            let primary = self.primary_of(contact)?;
            by_id.entry(primary.id).or_insert(primary);
        }

        let mut primaries: Vec<ContactRow> = by_id.into_values().collect();
        primaries.sort_by_key(ContactRow::age_key);
        Ok(primaries)
    }

    /// Follow links from a secondary up to its primary
    fn primary_of(&self, contact: &ContactRow) -> Result<ContactRow, StorageError> {
        let mut current = contact.clone();
        let mut visited = HashSet::from([current.id]);

        loop {
            if current.is_primary() {
                return Ok(current);
            }

            let child_id = current.id;
            let parent_id = current.linked_id.ok_or_else(|| {
                StorageError::Integrity(format!("secondary contact {} has no link", child_id))
            })?;

            if !visited.insert(parent_id) {
                return Err(StorageError::Integrity(format!(
                    "link cycle through contact {}",
                    parent_id
                )));
            }

            current = self
                .store
                .find_by_id_or_linked_id(parent_id)?
                .into_iter()
                .find(|c| c.id == parent_id)
                .ok_or_else(|| {
                    StorageError::Integrity(format!(
                        "contact {} links to missing contact {}",
                        child_id, parent_id
                    ))
                })?;
        }
    }

    /// Relink every contact hanging below a secondary of `cluster` to `root_id`
    ///
    /// `cluster` is the root plus its direct members. Returns the relinked ids,
    /// empty when the cluster is already flat.
    fn flatten_chains(
        &self,
        root_id: ContactId,
        cluster: &[ContactRow],
    ) -> Result<Vec<ContactId>, StorageError> {
        let secondary_ids: Vec<ContactId> = cluster
            .iter()
            .filter(|member| !member.is_primary())
            .map(|member| member.id)
            .collect();

        if self.store.find_linked_to(&secondary_ids)?.is_empty() {
            return Ok(Vec::new());
        }

        let relinked = self.relink_descendants(root_id, root_id)?;
        info!(primary_id = root_id, relinked = relinked.len(), "Flattened contact chain");
        Ok(relinked)
    }

    /// Demote `loser` and relink all of its descendants directly to `root`
    fn merge_into(
        &self,
        root: &ContactRow,
        loser: &ContactRow,
    ) -> Result<ClusterMerge, StorageError> {
        self.store
            .update_precedence(loser.id, LinkPrecedence::Secondary, Some(root.id))?;

        let relinked_ids = self.relink_descendants(root.id, loser.id)?;

        info!(
            primary_id = root.id,
            demoted_id = loser.id,
            relinked = relinked_ids.len(),
            "Merged contact clusters"
        );

        Ok(ClusterMerge {
            primary_id: root.id,
            demoted_id: loser.id,
            relinked_ids,
        })
    }

    /// Walk every descendant of `start_id` and point it straight at `root_id`
    ///
    /// Returns the ids whose link changed. Children already linked to the
    /// root are walked but left untouched.
    fn relink_descendants(
        &self,
        root_id: ContactId,
        start_id: ContactId,
    ) -> Result<Vec<ContactId>, StorageError> {
        let mut relinked_ids = Vec::new();
        let mut visited = HashSet::from([root_id, start_id]);
        let mut pending = VecDeque::from([start_id]);

        while let Some(parent_id) = pending.pop_front() {
            for child in self.store.find_by_id_or_linked_id(parent_id)? {
                if child.linked_id != Some(parent_id) || !visited.insert(child.id) {
                    continue;
                }
                if parent_id != root_id {
                    self.store
                        .update_precedence(child.id, LinkPrecedence::Secondary, Some(root_id))?;
                    relinked_ids.push(child.id);
                }
                pending.push_back(child.id);
            }
        }

        Ok(relinked_ids)
    }
}

/// Treat blank input the same as a missing field
fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// True when the email or the phone number is unseen anywhere in the cluster
fn has_new_information(
    cluster: &[ContactRow],
    email: Option<&str>,
    phone_number: Option<&str>,
) -> bool {
    let email_is_new = email
        .is_some_and(|email| !cluster.iter().any(|c| c.email.as_deref() == Some(email)));
    let phone_is_new = phone_number
        .is_some_and(|phone| !cluster.iter().any(|c| c.phone_number.as_deref() == Some(phone)));

    email_is_new || phone_is_new
}
