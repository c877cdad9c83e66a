//! Wiring: environment, hub session, server and the control tasks around it.

use hookd_core::{Environment, Server, ServerHandle, WaitOutcome};
use hookd_hub::{HubConfig, HubSession};
use tokio::sync::mpsc;
use tracing::{info, info_span, warn};

use crate::cli::Args;
use crate::error::Result;
use crate::handler_watcher::{HandlerWatcher, watch_roots};

/// Everything needed to start the server, resolved from arguments and the
/// environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub hub: HubConfig,
    pub handler_paths: Vec<String>,
    pub watch: bool,
}

impl Settings {
    /// # Errors
    ///
    /// Returns an error for missing hub credentials or when no handler path
    /// can be determined.
    pub fn resolve(args: &Args, env: &Environment) -> Result<Self> {
        let mut hub = HubConfig::from_environment(env)?;
        if let Some(timeout) = args.timeout() {
            hub = hub.with_request_timeout(timeout);
        }

        Ok(Self {
            hub,
            handler_paths: args.resolved_handler_paths()?,
            watch: args.watch,
        })
    }
}

/// Connect to the hub explicitly, register handlers and serve until the hub
/// hangs up or Ctrl-C is pressed.
///
/// Restarts triggered by the watcher use auto-connecting sessions.
///
/// # Errors
///
/// Propagates connection and startup errors from the server.
pub async fn run(settings: Settings, env: Environment) -> Result<WaitOutcome> {
    let Settings {
        hub,
        handler_paths,
        watch,
    } = settings;

    let mut server = Server::new(handler_paths.clone(), HubSession::connector(hub.clone()))
        .with_environment(env.clone())
        .with_span(info_span!("server", hub = %hub.address));
    if let Some(timeout) = hub.request_timeout {
        server = server.with_connect_timeout(timeout);
    }

    spawn_ctrl_c(server.handle());

    let _watcher = if watch {
        spawn_reload(server.handle(), &handler_paths, &env)
    } else {
        None
    };

    let outcome = server.run(Some(HubSession::new(hub)), true).await?;
    info!("Server finished: {:?}", outcome);
    Ok(outcome)
}

fn spawn_ctrl_c(handle: ServerHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping");
            if handle.stop().is_err() {
                warn!("Server already gone");
            }
        }
    });
}

/// Watch the handler paths and re-apply them on change.
fn spawn_reload(
    handle: ServerHandle,
    handler_paths: &[String],
    env: &Environment,
) -> Option<HandlerWatcher> {
    let roots = watch_roots(handler_paths, env);
    if roots.is_empty() {
        warn!("No existing handler paths to watch");
        return None;
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let watcher = HandlerWatcher::spawn(roots, tx);
    let paths = handler_paths.to_vec();

    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            info!("Handler files changed, reloading");
            if handle.set_handler_paths(paths.clone()).is_err() {
                break;
            }
        }
    });

    Some(watcher)
}
