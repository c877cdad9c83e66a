//! Command line arguments.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use directories::ProjectDirs;

use crate::error::{DaemonError, Result};

/// hookd daemon - runs event handlers against an event hub
///
/// Hub credentials come from `HOOKD_SERVER_URL`, `HOOKD_API_USER` and
/// `HOOKD_API_KEY`.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "hookd-daemon")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Directory or file to load handlers from. `${VAR}` is expanded from
    /// the environment. Repeatable; defaults to `<config dir>/handlers`
    #[arg(long = "handler-path", value_name = "TEMPLATE")]
    pub handler_paths: Vec<String>,

    /// Seconds to wait for the event hub (overrides `HOOKD_REQUEST_TIMEOUT`)
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Reload handlers when files under the handler paths change
    #[arg(long)]
    pub watch: bool,
}

impl Args {
    /// Handler path templates, falling back to the default directory.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::NoConfigDir`] if no paths were given and the
    /// platform has no configuration directory.
    pub fn resolved_handler_paths(&self) -> Result<Vec<String>> {
        if !self.handler_paths.is_empty() {
            return Ok(self.handler_paths.clone());
        }
        let dir = default_handler_dir().ok_or(DaemonError::NoConfigDir)?;
        Ok(vec![dir.to_string_lossy().into_owned()])
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

/// `~/.config/hookd/handlers` on Linux, the platform equivalent elsewhere.
#[must_use]
pub fn default_handler_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "hookd").map(|dirs| dirs.config_dir().join("handlers"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeatable_handler_paths() {
        let args = Args::try_parse_from([
            "hookd-daemon",
            "--handler-path",
            "${STUDIO_ROOT}/handlers",
            "--handler-path",
            "/srv/hookd/shared",
            "--timeout",
            "15",
            "--watch",
        ])
        .unwrap();

        assert_eq!(
            args.handler_paths,
            vec!["${STUDIO_ROOT}/handlers", "/srv/hookd/shared"]
        );
        assert_eq!(args.timeout(), Some(Duration::from_secs(15)));
        assert!(args.watch);
        assert_eq!(
            args.resolved_handler_paths().unwrap(),
            args.handler_paths
        );
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["hookd-daemon"]).unwrap();
        assert!(args.handler_paths.is_empty());
        assert_eq!(args.timeout(), None);
        assert!(!args.watch);
    }

    #[test]
    fn test_default_handler_dir_ends_with_handlers() {
        if let Some(dir) = default_handler_dir() {
            assert!(dir.ends_with("handlers"));
        }
    }

    #[test]
    fn test_rejects_non_numeric_timeout() {
        assert!(Args::try_parse_from(["hookd-daemon", "--timeout", "soon"]).is_err());
    }
}
