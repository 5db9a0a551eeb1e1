use thiserror::Error;

use bery_shared::ProtocolError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Unable to connect after {attempts} attempts")]
    Unreachable { attempts: u32 },

    #[error("Session is closed")]
    Closed,
}
