pub mod client;
pub mod conversation;
pub mod poller;

pub use client::ChatClient;
pub use conversation::{Backends, ConversationSnapshot, SessionPhase, SessionSettings};
