//! Contacts CRUD operations
//!
//! Row-level access to the `contacts` table. Every lookup skips
//! soft-deleted rows and returns contacts oldest first.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::StorageError;

/// Contact identifier assigned by the database
pub type ContactId = i64;

// =============================================================================
// Types
// =============================================================================

/// Whether a contact represents its cluster or defers to another contact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPrecedence {
    Primary,
    Secondary,
}

impl LinkPrecedence {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkPrecedence::Primary => "primary",
            LinkPrecedence::Secondary => "secondary",
        }
    }
}

impl fmt::Display for LinkPrecedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown link precedence: {0}")]
pub struct UnknownPrecedence(String);

impl FromStr for LinkPrecedence {
    type Err = UnknownPrecedence;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(LinkPrecedence::Primary),
            "secondary" => Ok(LinkPrecedence::Secondary),
            other => Err(UnknownPrecedence(other.to_string())),
        }
    }
}

impl ToSql for LinkPrecedence {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for LinkPrecedence {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Contact row from database
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRow {
    pub id: ContactId,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ContactRow {
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    /// Ordering key used to pick the oldest primary
    pub fn age_key(&self) -> (DateTime<Utc>, ContactId) {
        (self.created_at, self.id)
    }
}

/// Input for creating a contact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
}

impl NewContact {
    pub fn primary(email: Option<&str>, phone_number: Option<&str>) -> Self {
        Self {
            email: email.map(str::to_string),
            phone_number: phone_number.map(str::to_string),
            linked_id: None,
            link_precedence: LinkPrecedence::Primary,
        }
    }

    pub fn secondary(
        email: Option<&str>,
        phone_number: Option<&str>,
        primary_id: ContactId,
    ) -> Self {
        Self {
            email: email.map(str::to_string),
            phone_number: phone_number.map(str::to_string),
            linked_id: Some(primary_id),
            link_precedence: LinkPrecedence::Secondary,
        }
    }
}

const CONTACT_COLUMNS: &str = "id, phone_number, email, linked_id, link_precedence,
    created_at, updated_at, deleted_at";

fn map_contact(row: &Row<'_>) -> rusqlite::Result<ContactRow> {
    Ok(ContactRow {
        id: row.get(0)?,
        phone_number: row.get(1)?,
        email: row.get(2)?,
        linked_id: row.get(3)?,
        link_precedence: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        deleted_at: row.get(7)?,
    })
}

fn collect_contacts(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> Result<Vec<ContactRow>, StorageError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| StorageError::Internal(format!("Failed to prepare statement: {}", e)))?;

    let rows = stmt.query_map(params, map_contact)?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }

    Ok(results)
}

// =============================================================================
// CRUD Operations
// =============================================================================

/// Get a live contact by ID
pub fn get_contact(conn: &Connection, id: ContactId) -> Result<Option<ContactRow>, StorageError> {
    let sql = format!(
        "SELECT {} FROM contacts WHERE id = ? AND deleted_at IS NULL",
        CONTACT_COLUMNS
    );

    conn.query_row(&sql, params![id], map_contact)
        .optional()
        .map_err(StorageError::from)
}

/// Contacts whose email or phone number equals one of the given values
///
/// An absent value contributes no clause; with both absent nothing matches.
pub fn find_by_email_or_phone(
    conn: &Connection,
    email: Option<&str>,
    phone_number: Option<&str>,
) -> Result<Vec<ContactRow>, StorageError> {
    let mut clauses = Vec::new();
    let mut params_vec: Vec<&dyn ToSql> = Vec::new();

    if let Some(email) = &email {
        clauses.push("email = ?");
        params_vec.push(email);
    }
    if let Some(phone) = &phone_number {
        clauses.push("phone_number = ?");
        params_vec.push(phone);
    }

    if clauses.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT {} FROM contacts WHERE deleted_at IS NULL AND ({})
         ORDER BY created_at ASC, id ASC",
        CONTACT_COLUMNS,
        clauses.join(" OR ")
    );

    collect_contacts(conn, &sql, &params_vec)
}

/// A contact plus every contact linked directly to it
pub fn find_by_id_or_linked_id(
    conn: &Connection,
    id: ContactId,
) -> Result<Vec<ContactRow>, StorageError> {
    let sql = format!(
        "SELECT {} FROM contacts WHERE deleted_at IS NULL AND (id = ?1 OR linked_id = ?1)
         ORDER BY created_at ASC, id ASC",
        CONTACT_COLUMNS
    );

    collect_contacts(conn, &sql, &[&id as &dyn ToSql])
}

/// Contacts whose `linked_id` is one of `parent_ids`
///
/// Returns empty without querying when `parent_ids` is empty.
pub fn find_linked_to(
    conn: &Connection,
    parent_ids: &[ContactId],
) -> Result<Vec<ContactRow>, StorageError> {
    if parent_ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; parent_ids.len()].join(", ");
    let sql = format!(
        "SELECT {} FROM contacts WHERE deleted_at IS NULL AND linked_id IN ({})
         ORDER BY created_at ASC, id ASC",
        CONTACT_COLUMNS, placeholders
    );
    let params_vec: Vec<&dyn ToSql> = parent_ids.iter().map(|id| id as &dyn ToSql).collect();

    collect_contacts(conn, &sql, &params_vec)
}

/// Create a new contact stamped with the current time
pub fn insert_contact(conn: &Connection, input: &NewContact) -> Result<ContactRow, StorageError> {
    insert_contact_at(conn, input, Utc::now())
}

/// Create a new contact with an explicit creation time
pub fn insert_contact_at(
    conn: &Connection,
    input: &NewContact,
    created_at: DateTime<Utc>,
) -> Result<ContactRow, StorageError> {
    conn.execute(
        "INSERT INTO contacts
             (phone_number, email, linked_id, link_precedence, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            input.phone_number,
            input.email,
            input.linked_id,
            input.link_precedence,
            created_at,
            created_at,
        ],
    )?;

    let id = conn.last_insert_rowid();

    get_contact(conn, id)?
        .ok_or_else(|| StorageError::Internal("Failed to retrieve created contact".to_string()))
}

/// Set a contact's precedence and link target
pub fn update_precedence(
    conn: &Connection,
    id: ContactId,
    precedence: LinkPrecedence,
    linked_id: Option<ContactId>,
) -> Result<(), StorageError> {
    let rows = conn.execute(
        "UPDATE contacts SET link_precedence = ?, linked_id = ?, updated_at = ?
         WHERE id = ? AND deleted_at IS NULL",
        params![precedence, linked_id, Utc::now(), id],
    )?;

    if rows == 0 {
        return Err(StorageError::NotFound(id.to_string()));
    }

    Ok(())
}

/// Mark a contact deleted; it disappears from every lookup
///
/// Administrative entry point for retiring a contact. The identify flow never
/// deletes; rows removed here simply stop matching and stop counting.
pub fn soft_delete_contact(conn: &Connection, id: ContactId) -> Result<bool, StorageError> {
    let rows = conn.execute(
        "UPDATE contacts SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL",
        params![Utc::now(), id],
    )?;

    Ok(rows > 0)
}

/// Count live contacts by precedence
pub fn count_by_precedence(
    conn: &Connection,
    precedence: LinkPrecedence,
) -> Result<u64, StorageError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM contacts WHERE deleted_at IS NULL AND link_precedence = ?",
        params![precedence],
        |row| row.get(0),
    )?;

    Ok(count as u64)
}
