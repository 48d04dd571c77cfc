pub mod messages;
pub mod roster;

pub use messages::{DeliveryStatus, Fragment, MessageView, OutgoingState, Provenance};
pub use roster::{RosterEntry, RosterView};
