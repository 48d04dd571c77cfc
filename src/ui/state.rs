use crate::common::{Peer, UserNotice};
use crate::render::{Fragment, RosterEntry};
use crate::session::{ConversationSnapshot, SessionPhase};

/// Most recent notices kept for the status bar.
const MAX_NOTICES: usize = 20;

/// Local state of the UI, rebuilt from client events.
pub struct AppState {
    pub phase: SessionPhase,
    pub peer: Option<Peer>,
    pub messages: Vec<Fragment>,
    pub revision: u64,
    pub error: Option<String>,
    // Row the chat area still has to scroll to.
    scroll_target: Option<usize>,
    pub roster: Vec<RosterEntry>,
    pub notices: Vec<UserNotice>,
    pub input_text: String,
    pub logged_out: bool,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Idle,
            peer: None,
            messages: Vec::new(),
            revision: 0,
            error: None,
            scroll_target: None,
            roster: Vec::new(),
            notices: Vec::new(),
            input_text: String::new(),
            logged_out: false,
        }
    }

    pub fn apply_conversation(&mut self, snapshot: ConversationSnapshot) {
        if snapshot.revision != self.revision || snapshot.peer != self.peer {
            self.scroll_target = snapshot.scroll_anchor;
        }
        self.phase = snapshot.phase;
        self.peer = snapshot.peer;
        self.messages = snapshot.messages;
        self.revision = snapshot.revision;
        self.error = snapshot.error;
    }

    /// The row to scroll to, once per change of the message list.
    pub fn take_scroll_target(&mut self) -> Option<usize> {
        self.scroll_target.take()
    }

    pub fn apply_roster(&mut self, roster: Vec<RosterEntry>) {
        self.roster = roster;
    }

    pub fn push_notice(&mut self, notice: UserNotice) {
        if self.notices.len() >= MAX_NOTICES {
            self.notices.remove(0);
        }
        self.notices.push(notice);
    }

    pub fn latest_notice(&self) -> Option<&UserNotice> {
        self.notices.last()
    }

    pub fn mark_logged_out(&mut self) {
        self.logged_out = true;
        self.input_text.clear();
    }

    /// Composing is possible only once a conversation is live.
    pub fn can_compose(&self) -> bool {
        !self.logged_out && self.peer.is_some() && self.phase == SessionPhase::Active
    }

    pub fn title(&self) -> String {
        match &self.peer {
            Some(peer) => format!("Chat with {}", peer.name),
            None => "Select a conversation".to_string(),
        }
    }
}
