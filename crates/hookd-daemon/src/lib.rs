//! hookd daemon: command line, hot reload and process wiring around
//! [`hookd_core::Server`] and [`hookd_hub::HubSession`].

pub mod app;
pub mod cli;
pub mod error;
pub mod handler_watcher;

pub use app::{Settings, run};
pub use cli::{Args, default_handler_dir};
pub use error::{DaemonError, Result};
