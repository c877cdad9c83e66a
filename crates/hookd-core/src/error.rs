use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection to event hub was not established in {} seconds", .0.as_secs())]
    ConnectionTimeout(Duration),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid subscription: {0}")]
    Subscription(String),

    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("Registration error: {0}")]
    Register(String),

    #[error("Server task is gone")]
    ServerGone,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Render a caught panic payload as text.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
