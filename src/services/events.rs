//! Event system for contact operations
//!
//! Provides an event bus for notifying listeners about identity changes.
//! Useful for:
//! - Audit logging
//! - Downstream CRM sync
//! - Cache invalidation

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use crate::db::ContactId;
use crate::resolver::Resolution;

/// Contact events emitted after a committed identify call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactEvent {
    PrimaryCreated {
        id: ContactId,
    },
    SecondaryCreated {
        id: ContactId,
        primary_id: ContactId,
    },
    ClustersMerged {
        primary_id: ContactId,
        demoted_id: ContactId,
        relinked_ids: Vec<ContactId>,
    },
    ChainFlattened {
        primary_id: ContactId,
        relinked_ids: Vec<ContactId>,
    },
}

impl ContactEvent {
    /// Events describing the writes performed by one resolution
    pub fn from_resolution(resolution: &Resolution) -> Vec<ContactEvent> {
        let primary_id = resolution.view.primary_contact_id;
        let mut events = Vec::new();

        for merge in &resolution.merges {
            events.push(ContactEvent::ClustersMerged {
                primary_id: merge.primary_id,
                demoted_id: merge.demoted_id,
                relinked_ids: merge.relinked_ids.clone(),
            });
        }

        if !resolution.flattened.is_empty() {
            events.push(ContactEvent::ChainFlattened {
                primary_id,
                relinked_ids: resolution.flattened.clone(),
            });
        }

        if let Some(created) = &resolution.inserted {
            events.push(match created.linked_id {
                None => ContactEvent::PrimaryCreated { id: created.id },
                Some(primary_id) => ContactEvent::SecondaryCreated {
                    id: created.id,
                    primary_id,
                },
            });
        }

        events
    }
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    /// Handle an event
    fn on_event(&self, event: &ContactEvent);
}

/// Event bus for broadcasting contact events
pub struct EventBus {
    sender: broadcast::Sender<ContactEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: ContactEvent) {
        trace!(event = ?event, "Emitting contact event");
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<ContactEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &ContactEvent) {
        match event {
            ContactEvent::PrimaryCreated { id } => {
                debug!(id = id, "Primary contact created");
            }
            ContactEvent::SecondaryCreated { id, primary_id } => {
                debug!(id = id, primary_id = primary_id, "Secondary contact created");
            }
            ContactEvent::ClustersMerged {
                primary_id,
                demoted_id,
                relinked_ids,
            } => {
                info!(
                    primary_id = primary_id,
                    demoted_id = demoted_id,
                    relinked = ?relinked_ids,
                    "Contact clusters merged"
                );
            }
            ContactEvent::ChainFlattened { .. } => {
                trace!(event = ?event, "Contact event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}
