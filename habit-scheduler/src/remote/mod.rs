//! Connectivity to the remote task tracker.
//!
//! The reconciliation engine only sees the [`RemoteTracker`] trait: it can create an open
//! item for a due task and fetch the current list of items. The concrete HTTP client for
//! the Habitica API lives in the `habitica` submodule.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use serde::{Deserialize, Serialize};

pub mod habitica;

pub use habitica::HabiticaClient;

/// Errors that can occur while talking to the remote tracker.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The request could not be sent or the response could not be read.
    #[error("Remote request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The tracker answered with a non-success status.
    #[error("Remote tracker responded with status {status}: {body}")]
    Status { status: u16, body: String },
    /// The response body was not the JSON shape we expect.
    #[error("Malformed response from remote tracker: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A created item came back without an identifier.
    #[error("Remote tracker did not assign an ID to the created item")]
    MissingId,
}

/// Creation request for a new open item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRemoteItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    pub date_created: DateTime<Utc>,
}

impl NewRemoteItem {
    /// An open to-do carrying `text`, created at `now`.
    pub fn todo(text: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            kind: "todo".to_string(),
            text: text.into(),
            date_created: now,
        }
    }
}

/// Read-only reflection of an item held by the remote tracker.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(from = "WireItem")]
pub struct RemoteItem {
    pub id: String,
    pub text: String,
    pub completed: bool,
    pub date_completed: Option<DateTime<Utc>>,
}

/// Item as it appears on the wire; the tracker may send `id`, `_id`, or both.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireItem {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "_id")]
    underscore_id: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    completed: bool,
    #[serde(default)]
    date_completed: Option<DateTime<Utc>>,
}

impl From<WireItem> for RemoteItem {
    fn from(wire: WireItem) -> Self {
        Self {
            id: wire.id.or(wire.underscore_id).unwrap_or_default(),
            text: wire.text,
            completed: wire.completed,
            date_completed: wire.date_completed,
        }
    }
}

/// Trait for abstracting the remote tracker.
#[automock]
#[async_trait]
pub trait RemoteTracker: Send + Sync {
    /// Creates an open item and returns it with the identifier the tracker assigned.
    async fn create_item(&self, item: &NewRemoteItem) -> Result<RemoteItem, RemoteError>;

    /// Fetches every item the tracker currently reports.
    async fn fetch_items(&self) -> Result<Vec<RemoteItem>, RemoteError>;
}
