//! Read-side capabilities used while evaluating award conditions.

use crate::filter::RowFilter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from row queries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The collection does not exist
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// The query backend could not be reached
    #[error("Query backend unavailable: {0}")]
    Unavailable(String),
}

/// Counts rows matching a filter.
pub trait RowCounter: Send + Sync {
    /// Number of rows of `collection` matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] if the count cannot be computed.
    fn count_rows<'a>(
        &'a self,
        collection: &'a str,
        filter: &'a RowFilter,
    ) -> Pin<Box<dyn Future<Output = Result<u64, QueryError>> + Send + 'a>>;
}

/// Authenticated user identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Wrap a user id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Looks up the signed-in user.
///
/// `None` means nobody is authenticated; callers treat that as a normal skip.
pub trait CurrentUser: Send + Sync {
    /// The signed-in user, if any.
    fn current_user(&self) -> Pin<Box<dyn Future<Output = Option<UserId>> + Send + '_>>;
}
