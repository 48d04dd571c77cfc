use serde::{Deserialize, Serialize};

/// A known user other than ourselves, as returned by the roster endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: String,
    pub name: String,
    #[serde(rename = "online_status", default)]
    pub online: bool,
}

/// One chat message, either from the history endpoint or a push frame.
///
/// Push frames only guarantee `recipient_id` and `content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    pub recipient_id: String,
    pub content: String,
    /// Server ordering key, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl ChatMessage {
    pub fn outgoing(sender_id: &str, message: &OutgoingMessage) -> Self {
        Self {
            id: None,
            sender_id: Some(sender_id.to_string()),
            recipient_id: message.recipient_id.clone(),
            content: message.content.clone(),
            created_at: None,
        }
    }
}

/// Body of `POST /chat/messages` and of frames relayed over the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub recipient_id: String,
    pub content: String,
}

/// Which side of the conversation a message is drawn on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Mine,
    Theirs,
}

/// The `(local user, active peer)` pair every direction decision is made from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Perspective {
    pub local_user: String,
    pub active_peer: String,
}

impl Perspective {
    pub fn new(local_user: impl Into<String>, active_peer: impl Into<String>) -> Self {
        Self {
            local_user: local_user.into(),
            active_peer: active_peer.into(),
        }
    }

    /// Direction rule shared by the push path and the history path.
    ///
    /// Mine: addressed to the active peer and sent by us (or sender unknown).
    /// Theirs: addressed to us. Anything else is not part of this conversation.
    pub fn direction_of(&self, message: &ChatMessage) -> Option<Direction> {
        if message.recipient_id == self.active_peer {
            match message.sender_id.as_deref() {
                None => Some(Direction::Mine),
                Some(sender) if sender == self.local_user => Some(Direction::Mine),
                Some(_) => None,
            }
        } else if message.recipient_id == self.local_user {
            Some(Direction::Theirs)
        } else {
            None
        }
    }
}
