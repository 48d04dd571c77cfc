pub mod commands;
pub mod events;
pub mod types;

pub use commands::ClientCommand;
pub use events::{ClientEvent, NoticeKind, UserNotice};
pub use types::{ChatMessage, Direction, OutgoingMessage, Peer, Perspective};
