/**
 * Cross-Context Messages
 *
 * Messages posted between the foreground context and the background sync
 * context. Contexts share no memory; these messages plus the queue database
 * are the only things they exchange.
 *
 * The JSON form is tagged by `type`, so a bare trigger reads
 * `{"type":"PROCESS_QUEUE"}` on any bridge that carries text.
 */
use serde::{Deserialize, Serialize};

/// Message understood by a background sync context
///
/// # Example
/// ```rust
/// use campo_sync::shared::message::ContextMessage;
///
/// let message = ContextMessage::from_json(r#"{"type":"PROCESS_QUEUE"}"#).unwrap();
/// assert_eq!(message, ContextMessage::ProcessQueue);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContextMessage {
    /// Run one reconciliation pass now
    ProcessQueue,
    /// Reconcile now if online, otherwise on the next connectivity restore
    RegisterSync {
        /// Registration tag, e.g. `sync-events`
        tag: String,
    },
    /// Stop the background context after the current pass
    Shutdown,
}

/// Tag used for the default background sync registration
pub const DEFAULT_SYNC_TAG: &str = "sync-events";

impl ContextMessage {
    /// Registration with the default tag
    pub fn register_default() -> Self {
        Self::RegisterSync {
            tag: DEFAULT_SYNC_TAG.to_string(),
        }
    }

    /// Parse a message received as JSON text
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Encode the message as JSON text
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
