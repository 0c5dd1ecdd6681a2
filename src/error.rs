//! Error types for contact-identity

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Contact not found: {0}")]
    NotFound(String),

    #[error("Contact link integrity violated: {0}")]
    Integrity(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of a single identify request
#[derive(Error, Debug)]
pub enum ResolveError {
    /// Neither an email nor a phone number was supplied
    #[error("email or phone number required")]
    MissingIdentity,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ResolveError {
    /// True when the caller is at fault and retrying the same input cannot help
    pub fn is_validation(&self) -> bool {
        matches!(self, ResolveError::MissingIdentity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_identity_message() {
        let err = ResolveError::MissingIdentity;
        assert_eq!(err.to_string(), "email or phone number required");
        assert!(err.is_validation());
    }

    #[test]
    fn test_storage_error_is_transparent() {
        let err: ResolveError = StorageError::NotFound("7".into()).into();
        assert_eq!(err.to_string(), "Contact not found: 7");
        assert!(!err.is_validation());
    }
}
