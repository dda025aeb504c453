use serde::{Deserialize, Serialize};

/// Inbound events from the chat platform, parsed into a tagged union at the
/// transport boundary. The platform adapter is out of core scope; it posts
/// these to the ingest endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatEvent {
    Message(MessageEvent),
    Action(ActionEvent),
    Presence(PresenceEvent),
}

/// A plain user message. `thread_id` is set for replies inside a thread;
/// top-level messages carry their own id as the thread root when a command
/// starts a new thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub channel_id: String,
    pub thread_id: Option<String>,
    pub message_id: String,
    pub user_id: String,
    pub user_name: Option<String>,
    pub text: String,
}

impl MessageEvent {
    /// Thread the message belongs to: its own thread, or itself as the root.
    pub fn thread_root(&self) -> &str {
        self.thread_id.as_deref().unwrap_or(&self.message_id)
    }
}

/// An interactive button press on a previously posted message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEvent {
    pub action_id: String,
    pub value: Option<String>,
    pub channel_id: String,
    pub thread_id: Option<String>,
    pub message_id: String,
    pub user_id: String,
}

impl ActionEvent {
    pub fn thread_root(&self) -> &str {
        self.thread_id.as_deref().unwrap_or(&self.message_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    Joined,
    Left,
}

/// A user joining or leaving the live room tied to the show.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub room_id: String,
    pub channel_id: Option<String>,
    pub user_id: String,
    pub user_name: String,
    pub state: PresenceState,
}
