pub mod push;
pub mod store;

pub use push::{PushChannel, PushConnector, PushEvent, WsConnector};
pub use store::{AuthService, ConversationStore, HttpStore};
