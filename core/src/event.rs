//! Row change events delivered by an [`EventSource`](crate::event_source::EventSource).
//!
//! A [`RowEvent`] is an immutable description of a single row change in a
//! backend collection. The new row is carried as a JSON object so that one
//! event type can serve every collection; reactions decode it into a typed
//! row view (see [`crate::rows`]) with [`RowEvent::decode_record`].
//!
//! # Example
//!
//! ```
//! use greenleaf_core::event::{ChangeKind, EventId, RowEvent};
//! use greenleaf_core::rows::MilestoneRow;
//! use chrono::Utc;
//!
//! let event = RowEvent::new(
//!     EventId::new("growth_milestones:m-1:1"),
//!     "growth_milestones",
//!     ChangeKind::Insert,
//!     Utc::now(),
//!     serde_json::json!({
//!         "id": "m-1",
//!         "plant_id": "plant-7",
//!         "title": "First bloom!",
//!         "milestone_type": "flowering",
//!         "created_at": "2025-04-01T09:30:00Z",
//!     }),
//! );
//!
//! let row: MilestoneRow = event.decode_record().unwrap();
//! assert_eq!(row.plant_id, "plant-7");
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error types for event payload handling.
#[derive(Error, Debug)]
pub enum EventError {
    /// The record could not be decoded into the requested row type.
    #[error("Failed to decode {collection} record: {reason}")]
    Decode {
        /// Collection the event came from
        collection: String,
        /// Decoder message
        reason: String,
    },

    /// The change kind string is not one of `INSERT`, `UPDATE`, `DELETE`, `*`.
    #[error("Unknown change kind: {0}")]
    UnknownChangeKind(String),
}

/// Kind of row change an event describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// A row was inserted
    Insert,
    /// A row was updated
    Update,
    /// A row was deleted
    Delete,
    /// Wildcard used in subscriptions; never carried by an event
    #[serde(rename = "*")]
    All,
}

impl ChangeKind {
    /// Wire name of the change kind (`INSERT`, `UPDATE`, `DELETE`, `*`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::All => "*",
        }
    }

    /// Whether a subscription for `self` receives an event of kind `other`.
    #[must_use]
    pub fn accepts(self, other: Self) -> bool {
        self == Self::All || self == other
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChangeKind {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            "*" => Ok(Self::All),
            _ => Err(EventError::UnknownChangeKind(s.to_string())),
        }
    }
}

/// Identifier of a single event delivery.
///
/// Redelivery of the same change carries the same identifier, which makes it
/// usable as the basis of an idempotency key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(String);

impl EventId {
    /// Create an event identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable row change notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RowEvent {
    /// Delivery identifier
    pub id: EventId,
    /// Collection (table) the row belongs to
    pub collection: String,
    /// What happened to the row
    pub kind: ChangeKind,
    /// When the change was committed by the backend
    pub committed_at: DateTime<Utc>,
    /// The row after the change (`{}` for deletes)
    pub record: serde_json::Value,
    /// The row before the change, when the backend provides it
    pub old_record: Option<serde_json::Value>,
}

impl RowEvent {
    /// Create a row event without an old record.
    #[must_use]
    pub fn new(
        id: EventId,
        collection: impl Into<String>,
        kind: ChangeKind,
        committed_at: DateTime<Utc>,
        record: serde_json::Value,
    ) -> Self {
        Self {
            id,
            collection: collection.into(),
            kind,
            committed_at,
            record,
            old_record: None,
        }
    }

    /// Attach the previous version of the row.
    #[must_use]
    pub fn with_old_record(mut self, old_record: serde_json::Value) -> Self {
        self.old_record = Some(old_record);
        self
    }

    /// Decode the new record into a typed row view.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Decode`] if the record does not have the shape of `T`.
    pub fn decode_record<T: DeserializeOwned>(&self) -> Result<T, EventError> {
        serde_json::from_value(self.record.clone()).map_err(|e| EventError::Decode {
            collection: self.collection.clone(),
            reason: e.to_string(),
        })
    }

    /// Primary key of the new record, if it has a string or numeric `id`.
    #[must_use]
    pub fn row_id(&self) -> Option<String> {
        match self.record.get("id")? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for RowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RowEvent {{ id: {}, {} on {} }}",
            self.id, self.kind, self.collection
        )
    }
}
