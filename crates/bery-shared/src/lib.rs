// Wire protocol shared by the Bery chat relay and its clients.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use protocol::{Envelope, MediaAttachment};
pub use types::{ConnectionId, DeliveryStatus, MediaType, MessageId};
