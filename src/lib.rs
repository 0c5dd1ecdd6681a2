//! Contact Identity - links customer contacts into identity clusters
//!
//! Every submitted email/phone pair is stored as a contact. Contacts that
//! share an email or a phone number belong to the same customer; the oldest
//! of them is the cluster's primary and every other contact is a secondary
//! linked directly to it.
//!
//! ## Architecture
//!
//! - **http**: hyper server exposing `POST /identify`
//! - **services**: transaction boundary and event emission
//! - **resolver**: the identity-merge algorithm, generic over [`ContactStore`]
//! - **db**: SQLite contacts table and schema versioning
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/contact-identity/
//! ├── contacts.db            # Production contacts database
//! ├── contacts-test.db       # Test environment database
//! └── config.toml            # Configuration
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod resolver;
pub mod services;
pub mod store;

// Re-exports
pub use config::{Config, Environment};
pub use db::{ContactDb, ContactId, ContactRow, LinkPrecedence, NewContact};
pub use error::{ResolveError, StorageError};
pub use http::HttpServer;
pub use resolver::{ClusterMerge, ContactGroupView, IdentityResolver, Resolution};
pub use services::{IdentifyRequest, IdentifyResponse, IdentifyService, Services};
pub use store::ContactStore;
