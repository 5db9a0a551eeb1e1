//! Client side of the Bery chat relay.
//!
//! [`session::ChatSession`] owns one logical connection: it registers
//! before anything else, surfaces everything the relay sends as
//! [`events::SessionEvent`]s and reconnects with capped exponential backoff.
//! [`conversation::Conversations`] is the optimistic local message state a
//! UI renders from.

pub mod conversation;
pub mod error;
pub mod events;
pub mod reconnect;
pub mod session;

pub use conversation::{Conversations, Direction, LocalMessage};
pub use error::ClientError;
pub use events::{ConnectionState, SessionEvent};
pub use reconnect::ReconnectPolicy;
pub use session::{ChatSession, SessionConfig, SessionHandle};
