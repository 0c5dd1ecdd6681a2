//! Identify service - runs identity resolution against the contacts database
//!
//! Each call runs the resolver inside one IMMEDIATE transaction, so a request
//! either commits all of its demotions and inserts or none of them, and two
//! requests for overlapping identities never interleave.

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::db::{ContactDb, DbStats};
use crate::error::{ResolveError, StorageError};
use crate::resolver::{ContactGroupView, IdentityResolver, Resolution};

use super::events::{ContactEvent, EventBus};

/// Body of `POST /identify`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "deserialize_phone_number")]
    pub phone_number: Option<String>,
}

impl IdentifyRequest {
    pub fn new(email: Option<&str>, phone_number: Option<&str>) -> Self {
        Self {
            email: email.map(str::to_string),
            phone_number: phone_number.map(str::to_string),
        }
    }
}

/// Accept the phone number as a JSON string or a JSON integer
fn deserialize_phone_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PhoneNumber {
        Text(String),
        Number(u64),
    }

    Ok(Option::<PhoneNumber>::deserialize(deserializer)?.map(|phone| match phone {
        PhoneNumber::Text(text) => text,
        PhoneNumber::Number(number) => number.to_string(),
    }))
}

/// Body of a successful identify response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyResponse {
    pub contact: ContactGroupView,
}

/// Identify service for contact resolution
pub struct IdentifyService {
    contact_db: Arc<ContactDb>,
    events: Arc<EventBus>,
}

impl IdentifyService {
    /// Create a new identify service
    pub fn new(contact_db: Arc<ContactDb>, events: Arc<EventBus>) -> Self {
        Self { contact_db, events }
    }

    /// Resolve the request's identity and return the consolidated contact
    pub fn identify(&self, request: &IdentifyRequest) -> Result<IdentifyResponse, ResolveError> {
        let resolution = self.identify_detailed(request)?;
        Ok(IdentifyResponse {
            contact: resolution.view,
        })
    }

    /// Like `identify`, but returns the writes performed as well
    pub fn identify_detailed(&self, request: &IdentifyRequest) -> Result<Resolution, ResolveError> {
        let resolution = self.contact_db.with_transaction(|tx| {
            IdentityResolver::new(&**tx)
                .resolve_detailed(request.email.as_deref(), request.phone_number.as_deref())
        })?;

        debug!(
            primary_id = resolution.view.primary_contact_id,
            noop = resolution.is_noop(),
            "Identify request resolved"
        );

        for event in ContactEvent::from_resolution(&resolution) {
            self.events.emit(event);
        }

        Ok(resolution)
    }

    /// Database statistics for health reporting
    pub fn stats(&self) -> Result<DbStats, StorageError> {
        self.contact_db.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::contacts;
    use tokio::sync::broadcast::error::TryRecvError;

    fn service() -> (IdentifyService, Arc<ContactDb>, Arc<EventBus>) {
        let db = Arc::new(ContactDb::open_in_memory().unwrap());
        let events = Arc::new(EventBus::new());
        (IdentifyService::new(db.clone(), events.clone()), db, events)
    }

    #[test]
    fn test_request_accepts_numeric_phone() {
        let request: IdentifyRequest =
            serde_json::from_str(r#"{"email": null, "phoneNumber": 123456}"#).unwrap();
        assert_eq!(request, IdentifyRequest::new(None, Some("123456")));

        let request: IdentifyRequest = serde_json::from_str(r#"{"phoneNumber": "0800"}"#).unwrap();
        assert_eq!(request.phone_number.as_deref(), Some("0800"));

        let request: IdentifyRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request, IdentifyRequest::default());
    }

    #[test]
    fn test_identify_emits_events_after_commit() {
        let (service, _db, events) = service();
        let mut receiver = events.subscribe();

        let first = service
            .identify(&IdentifyRequest::new(Some("a@x.com"), Some("111")))
            .unwrap();
        let primary_id = first.contact.primary_contact_id;
        assert_eq!(receiver.try_recv().unwrap(), ContactEvent::PrimaryCreated { id: primary_id });

        let second = service
            .identify(&IdentifyRequest::new(Some("b@x.com"), Some("111")))
            .unwrap();
        assert_eq!(
            receiver.try_recv().unwrap(),
            ContactEvent::SecondaryCreated {
                id: second.contact.secondary_contact_ids[0],
                primary_id,
            }
        );

        service
            .identify(&IdentifyRequest::new(Some("b@x.com"), Some("111")))
            .unwrap();
        assert!(matches!(receiver.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_identify_emits_merge_event() {
        let (service, _db, events) = service();
        let x = service.identify(&IdentifyRequest::new(Some("a@x.com"), Some("111"))).unwrap();
        let y = service.identify(&IdentifyRequest::new(Some("b@x.com"), Some("222"))).unwrap();

        let mut receiver = events.subscribe();
        service
            .identify(&IdentifyRequest::new(Some("a@x.com"), Some("222")))
            .unwrap();

        assert_eq!(
            receiver.try_recv().unwrap(),
            ContactEvent::ClustersMerged {
                primary_id: x.contact.primary_contact_id,
                demoted_id: y.contact.primary_contact_id,
                relinked_ids: vec![],
            }
        );
    }

    #[test]
    fn test_validation_error_writes_nothing() {
        let (service, _db, events) = service();
        let mut receiver = events.subscribe();

        for request in [IdentifyRequest::default(), IdentifyRequest::new(Some(""), Some(" "))] {
            let err = service.identify(&request).unwrap_err();
            assert!(err.is_validation());
        }

        assert_eq!(service.stats().unwrap().contacts, 0);
        assert!(matches!(receiver.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_failed_merge_is_rolled_back() {
        let (service, db, _events) = service();
        let x = service.identify(&IdentifyRequest::new(Some("a@x.com"), Some("111"))).unwrap();
        let y = service.identify(&IdentifyRequest::new(Some("b@x.com"), Some("222"))).unwrap();
        let child = service.identify(&IdentifyRequest::new(Some("c@x.com"), Some("222"))).unwrap();
        let child_id = child.contact.secondary_contact_ids[0];

        // Demoting y succeeds, relinking its secondary fails
        db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER reject_relink BEFORE UPDATE ON contacts
                 WHEN OLD.link_precedence = 'secondary'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )?;
            Ok(())
        })
        .unwrap();

        let err = service
            .identify(&IdentifyRequest::new(Some("a@x.com"), Some("222")))
            .unwrap_err();
        assert!(matches!(err, ResolveError::Storage(_)));

        let get = |id| {
            db.with_conn(|conn| contacts::get_contact(conn, id))
                .unwrap()
                .unwrap()
        };
        assert!(get(x.contact.primary_contact_id).is_primary());
        assert!(get(y.contact.primary_contact_id).is_primary());
        assert_eq!(get(child_id).linked_id, Some(y.contact.primary_contact_id));
    }
}
