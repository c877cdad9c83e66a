//! Error types for the hookd daemon.

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File watcher error
    #[error("Watcher error: {0}")]
    Watcher(#[from] notify::Error),

    #[error("Hub error: {0}")]
    Hub(#[from] hookd_hub::HubError),

    #[error("Server error: {0}")]
    Core(#[from] hookd_core::Error),

    #[error("Could not determine the configuration directory")]
    NoConfigDir,
}

pub type Result<T> = std::result::Result<T, DaemonError>;
