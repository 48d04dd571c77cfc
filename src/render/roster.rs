use crate::common::{ClientCommand, Peer};

/// One row of the peer list. Carries the command its click handler sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub peer: Peer,
    pub selected: bool,
}

impl RosterEntry {
    pub fn select_command(&self) -> ClientCommand {
        ClientCommand::SelectPeer(self.peer.clone())
    }
}

/// The peer list, rebuilt from scratch on every roster fetch.
#[derive(Debug, Clone, Default)]
pub struct RosterView {
    entries: Vec<RosterEntry>,
}

impl RosterView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rebuild(&mut self, peers: Vec<Peer>, local_user: &str, active_peer: Option<&str>) {
        self.entries = peers
            .into_iter()
            .filter(|peer| peer.id != local_user)
            .map(|peer| RosterEntry {
                selected: active_peer == Some(peer.id.as_str()),
                peer,
            })
            .collect();
    }

    /// Move the highlight without refetching.
    pub fn mark_selected(&mut self, active_peer: Option<&str>) {
        for entry in &mut self.entries {
            entry.selected = active_peer == Some(entry.peer.id.as_str());
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }
}
