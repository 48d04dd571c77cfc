use super::types::Peer;

/// Commands the UI sends down to the client task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Open the conversation with this peer, replacing any current one.
    SelectPeer(Peer),
    /// Raw composer input; trimmed before sending.
    SendMessage(String),
    Logout,
}
