//! SQLite database module for contact storage
//!
//! ## Tables
//!
//! - `contacts` - One row per submitted identity (email and/or phone number),
//!   linked into primary/secondary clusters
//! - `schema_version` - Migration bookkeeping

pub mod schema;
pub mod contacts;

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::error::StorageError;

/// SQLite database for contacts
pub struct ContactDb {
    conn: Mutex<Connection>,
}

impl ContactDb {
    /// Open or create the contacts database
    pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<Self, StorageError> {
        info!("Opening SQLite database at {:?}", db_path);

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)
            .map_err(|e| StorageError::Internal(format!("Failed to open SQLite: {}", e)))?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| StorageError::Internal(format!("Failed to set PRAGMA: {}", e)))?;
        conn.busy_timeout(busy_timeout)?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StorageError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory().map_err(|e| {
            StorageError::Internal(format!("Failed to open in-memory SQLite: {}", e))
        })?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<(), StorageError> {
        self.with_conn(schema::init_schema)
    }

    /// Get a reference to the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StorageError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run `f` inside an IMMEDIATE transaction
    ///
    /// Commits when `f` succeeds; dropping the transaction on error rolls
    /// every write back.
    pub fn with_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, E>,
        E: From<StorageError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| StorageError::Internal(format!("Lock poisoned: {}", e)))?;

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| StorageError::Internal(format!("Failed to start transaction: {}", e)))?;

        let value = f(&tx)?;

        tx.commit()
            .map_err(|e| StorageError::Internal(format!("Failed to commit transaction: {}", e)))?;

        Ok(value)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, StorageError> {
        self.with_conn(|conn| {
            let primaries = contacts::count_by_precedence(conn, LinkPrecedence::Primary)?;
            let secondaries = contacts::count_by_precedence(conn, LinkPrecedence::Secondary)?;

            Ok(DbStats {
                contacts: primaries + secondaries,
                primaries,
                secondaries,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub contacts: u64,
    pub primaries: u64,
    pub secondaries: u64,
}

// Re-exports
pub use contacts::{ContactId, ContactRow, LinkPrecedence, NewContact};
