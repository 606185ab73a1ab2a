//! Client Interest Requests
//!
//! Parsing and validation of `{"names": [...]}` bodies sent over the
//! WebSocket and to the snapshot endpoint.

use serde::Deserialize;

use crate::domain::streaming::Symbol;

/// Shortest accepted symbol name.
pub const MIN_NAME_LEN: usize = 2;
/// Longest accepted symbol name.
pub const MAX_NAME_LEN: usize = 25;

/// A client's requested symbol set.
#[derive(Debug, Clone, Deserialize)]
pub struct InterestRequest {
    names: Option<Vec<String>>,
}

/// Rejected interest request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterestRequestError {
    /// Body is not valid JSON of the expected shape.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// `names` is absent or null.
    #[error("names is required")]
    MissingNames,

    /// A name is not 2 to 25 ASCII letters.
    #[error("invalid name {name:?}: {reason}")]
    InvalidName {
        /// The offending name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

impl InterestRequest {
    /// Parse and validate a request body.
    ///
    /// An empty `names` list is valid and means "nothing".
    ///
    /// # Errors
    ///
    /// Returns `InterestRequestError` if the body is malformed, `names` is
    /// missing, or any name fails validation.
    pub fn parse(body: &[u8]) -> Result<Vec<Symbol>, InterestRequestError> {
        let request: Self = serde_json::from_slice(body)
            .map_err(|e| InterestRequestError::Malformed(e.to_string()))?;
        request.validate()
    }

    /// Validate the names, returning them on success.
    ///
    /// # Errors
    ///
    /// Returns `InterestRequestError` if `names` is missing or any name fails
    /// validation.
    pub fn validate(self) -> Result<Vec<Symbol>, InterestRequestError> {
        let names = self.names.ok_or(InterestRequestError::MissingNames)?;
        for name in &names {
            validate_name(name)?;
        }
        Ok(names)
    }
}

fn validate_name(name: &str) -> Result<(), InterestRequestError> {
    let invalid = |reason| InterestRequestError::InvalidName {
        name: name.to_string(),
        reason,
    };

    if !name.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(invalid("must contain only ASCII letters"));
    }
    if name.len() < MIN_NAME_LEN {
        return Err(invalid("shorter than 2 characters"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("longer than 25 characters"));
    }
    Ok(())
}
