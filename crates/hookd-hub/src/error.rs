use std::time::Duration;

use thiserror::Error;

use crate::protocol::RpcError;
use crate::transport::CodecError;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RPC error: {code} - {message}")]
    Rpc { code: i32, message: String },

    #[error("Missing required environment variable {0}")]
    MissingCredential(&'static str),

    #[error("Invalid hub address: {0}")]
    InvalidUrl(String),

    #[error("Not connected to event hub")]
    NotConnected,

    #[error("Event hub closed the connection")]
    ConnectionClosed,

    #[error("Event hub did not answer within {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("Unexpected response from event hub")]
    UnexpectedResponse,
}

impl From<RpcError> for HubError {
    fn from(e: RpcError) -> Self {
        HubError::Rpc {
            code: e.code,
            message: e.message,
        }
    }
}

impl From<HubError> for hookd_core::Error {
    fn from(e: HubError) -> Self {
        match e {
            HubError::Io(io) => hookd_core::Error::Io(io),
            other => hookd_core::Error::Connection(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, HubError>;
