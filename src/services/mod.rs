//! Service layer for contact-identity
//!
//! Services encapsulate business logic between HTTP handlers and repositories.
//!
//! ## Architecture
//!
//! ```text
//! HTTP Handlers (thin)
//!     ↓
//! Service Layer (transactions, events)
//!     ↓
//! Identity Resolver (merge algorithm over ContactStore)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod response;
pub mod events;
pub mod identify_service;

// Re-exports
pub use events::{spawn_logging_listener, ContactEvent, EventBus, EventListener};
pub use identify_service::{IdentifyRequest, IdentifyResponse, IdentifyService};

use crate::db::ContactDb;
use std::sync::Arc;

/// Service container for dependency injection
///
/// Pass this to HttpServer for handler access.
pub struct Services {
    pub identify: Arc<IdentifyService>,
    pub events: Arc<EventBus>,
}

impl Services {
    /// Create all services with shared database
    pub fn new(contact_db: Arc<ContactDb>) -> Self {
        let events = Arc::new(EventBus::new());

        Self {
            identify: Arc::new(IdentifyService::new(contact_db, events.clone())),
            events,
        }
    }
}
