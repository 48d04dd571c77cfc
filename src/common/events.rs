use chrono::{DateTime, Utc};

use crate::render::RosterEntry;
use crate::session::ConversationSnapshot;

/// Events the client task publishes to the UI.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    ConversationUpdated(ConversationSnapshot),
    RosterUpdated(Vec<RosterEntry>),
    Notice(UserNotice),
    LoggedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    SendFailed,
    HistoryUnavailable,
    LogoutFailed,
}

/// A failure the user has to see, as opposed to one that is only logged.
#[derive(Debug, Clone)]
pub struct UserNotice {
    pub at: DateTime<Utc>,
    pub kind: NoticeKind,
    pub message: String,
}

impl UserNotice {
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            kind,
            message: message.into(),
        }
    }
}
