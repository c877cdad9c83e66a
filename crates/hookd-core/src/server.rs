//! Connection lifecycle and the dispatch wait loop.
//!
//! A [`Server`] owns one [`Connection`] at a time. It is driven by a single
//! task; other tasks steer it through a [`ServerHandle`].

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tracing::{Instrument, Span, debug, info, warn};

use crate::config::Environment;
use crate::connection::Connection;
use crate::loader::{HandlerLoader, LoadReport};
use crate::registrar::{RegistrationReport, register_all};
use crate::{Error, Result};

const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Connecting,
    Running,
}

/// What a call to [`Server::start`] achieved.
#[derive(Debug)]
pub enum StartOutcome {
    /// Connected, handlers loaded and registered.
    Running(StartupReport),
    /// Connected without loading handlers (`load_files` was false).
    Connected,
    /// Handler loading was requested but no handler paths are set.
    NoHandlerPaths,
    /// A stop request arrived while connecting.
    Cancelled,
}

impl StartOutcome {
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running(_) | Self::Connected)
    }
}

#[derive(Debug, Default)]
pub struct StartupReport {
    pub load: LoadReport,
    pub registration: RegistrationReport,
}

/// Why [`Server::wait`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The server was stopped through its handle.
    Stopped,
    /// The hub closed the link.
    ConnectionClosed,
    /// A reconfiguration restart did not reach Running, or the server was
    /// never started.
    NotRunning,
}

#[derive(Debug)]
enum Control {
    Stop,
    SetHandlerPaths(Vec<String>),
}

/// Cloneable remote control for a [`Server`].
#[derive(Debug, Clone)]
pub struct ServerHandle {
    tx: mpsc::UnboundedSender<Control>,
}

impl ServerHandle {
    /// Ask the server to stop. Aborts a pending connect or ends the wait loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServerGone`] if the server has been dropped.
    pub fn stop(&self) -> Result<()> {
        self.tx.send(Control::Stop).map_err(|_| Error::ServerGone)
    }

    /// Replace the handler paths, restarting the server if it is running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServerGone`] if the server has been dropped.
    pub fn set_handler_paths(&self, paths: Vec<String>) -> Result<()> {
        self.tx
            .send(Control::SetHandlerPaths(paths))
            .map_err(|_| Error::ServerGone)
    }
}

type Connector<C> = Box<dyn FnMut() -> C + Send>;

/// Owns the hub connection and the handler pipeline.
pub struct Server<C: Connection> {
    state: ServerState,
    handler_paths: Vec<String>,
    connection: Option<C>,
    connector: Connector<C>,
    loader: HandlerLoader,
    env: Environment,
    poll_interval: Duration,
    default_timeout: Duration,
    span: Span,
    control_tx: mpsc::UnboundedSender<Control>,
    control_rx: mpsc::UnboundedReceiver<Control>,
}

impl<C: Connection> Server<C> {
    /// Create a stopped server.
    ///
    /// `connector` builds an auto-connecting connection whenever `start` is
    /// not given one.
    pub fn new(handler_paths: Vec<String>, connector: impl FnMut() -> C + Send + 'static) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        Self {
            state: ServerState::Stopped,
            handler_paths,
            connection: None,
            connector: Box::new(connector),
            loader: HandlerLoader::default(),
            env: Environment::default(),
            poll_interval: CONNECT_POLL_INTERVAL,
            default_timeout: DEFAULT_CONNECT_TIMEOUT,
            span: Span::none(),
            control_tx,
            control_rx,
        }
    }

    /// Environment used to expand handler path templates.
    #[must_use]
    pub fn with_environment(mut self, env: Environment) -> Self {
        self.env = env;
        self
    }

    #[must_use]
    pub fn with_loader(mut self, loader: HandlerLoader) -> Self {
        self.loader = loader;
        self
    }

    /// Span every lifecycle operation is recorded under.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Timeout used when the connection has none of its own.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            tx: self.control_tx.clone(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        self.state
    }

    #[must_use]
    pub fn handler_paths(&self) -> &[String] {
        &self.handler_paths
    }

    #[must_use]
    pub fn connection(&self) -> Option<&C> {
        self.connection.as_ref()
    }

    /// Connect, then load and register handlers.
    ///
    /// Without a `connection` a fresh auto-connecting one is built. On
    /// success the server is Running unless the outcome says otherwise.
    ///
    /// Control requests queued before this call are settled first: stops are
    /// discarded and the latest handler paths are kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionTimeout`] if an auto-connecting connection
    /// does not come up in time, or the connection's error if an explicit
    /// `connect` fails. The server is left Connecting in both cases.
    pub async fn start(&mut self, connection: Option<C>, load_files: bool) -> Result<StartOutcome> {
        self.discard_stale_control();
        let span = self.span.clone();
        self.start_inner(connection, load_files)
            .instrument(span)
            .await
    }

    /// Start again with a fresh connection, keeping queued control requests.
    async fn restart(&mut self) -> Result<StartOutcome> {
        let span = self.span.clone();
        self.start_inner(None, true).instrument(span).await
    }

    fn discard_stale_control(&mut self) {
        while let Ok(control) = self.control_rx.try_recv() {
            match control {
                Control::Stop => debug!("Discarding stop requested before start"),
                Control::SetHandlerPaths(paths) => {
                    debug!("Applying handler paths requested before start");
                    self.handler_paths = paths;
                }
            }
        }
    }

    async fn start_inner(&mut self, connection: Option<C>, load_files: bool) -> Result<StartOutcome> {
        let connection = connection.unwrap_or_else(|| (self.connector)());
        if let Some(mut stale) = self.connection.replace(connection) {
            debug!("Releasing previous connection");
            stale.close();
        }
        self.state = ServerState::Connecting;

        if let Some(outcome) = self.establish().await? {
            return Ok(outcome);
        }

        if !load_files {
            self.state = ServerState::Running;
            info!("Connected to event hub, handler loading skipped");
            return Ok(StartOutcome::Connected);
        }

        if self.handler_paths.is_empty() {
            warn!("Paths to event handlers are not set. Server won't launch.");
            return Ok(StartOutcome::NoHandlerPaths);
        }

        self.state = ServerState::Running;
        let load = self.loader.load_paths(&self.handler_paths, &self.env);

        let Some(connection) = self.connection.as_mut() else {
            return Err(Error::Connection("connection released during startup".to_string()));
        };
        let registration = register_all(&load.modules, connection);

        Ok(StartOutcome::Running(StartupReport { load, registration }))
    }

    /// Bring the current connection up. `Some` means startup was cut short.
    async fn establish(&mut self) -> Result<Option<StartOutcome>> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(Error::Connection("no connection to establish".to_string()));
        };

        if connection.is_connected() {
            debug!("Event hub already connected");
            return Ok(None);
        }

        if !connection.auto_connects() {
            info!("Connecting event hub");
            connection.connect().await?;
            return Ok(None);
        }

        let timeout = connection.connect_timeout().unwrap_or(self.default_timeout);
        info!("Waiting for event hub to connect");
        let started = Instant::now();

        while !self.connection.as_ref().is_some_and(Connection::is_connected) {
            if started.elapsed() > timeout {
                return Err(Error::ConnectionTimeout(timeout));
            }

            let control = tokio::select! {
                () = sleep(self.poll_interval) => None,
                Some(control) = self.control_rx.recv() => Some(control),
            };

            match control {
                Some(Control::Stop) => {
                    info!("Stop requested while connecting");
                    self.stop().await;
                    return Ok(Some(StartOutcome::Cancelled));
                }
                Some(Control::SetHandlerPaths(paths)) => {
                    debug!("Handler paths replaced while connecting");
                    self.handler_paths = paths;
                }
                None => {}
            }
        }

        info!("Event hub connected");
        Ok(None)
    }

    /// Disconnect and release the connection.
    pub async fn stop(&mut self) {
        self.state = ServerState::Stopped;

        let Some(mut connection) = self.connection.take() else {
            debug!("Server already stopped");
            return;
        };

        if connection.is_connected()
            && let Err(e) = connection.disconnect().await
        {
            warn!("Failed to disconnect from event hub: {}", e);
        }
        connection.close();
        info!("Server stopped");
    }

    /// Replace the handler paths.
    ///
    /// Running: stop, then start again with the new paths. Connecting: start
    /// again. Stopped: the paths are used by the next `start`.
    ///
    /// # Errors
    ///
    /// Propagates startup errors from the restart.
    pub async fn set_handler_paths(&mut self, paths: Vec<String>) -> Result<Option<StartOutcome>> {
        self.handler_paths = paths;

        match self.state {
            ServerState::Running => {
                info!("Handler paths changed, restarting");
                self.stop().await;
                self.restart().await.map(Some)
            }
            ServerState::Connecting => self.restart().await.map(Some),
            ServerState::Stopped => Ok(None),
        }
    }

    /// Block on the connection's event loop until it ends or the server is
    /// stopped through its handle.
    ///
    /// Reconfiguration requests received meanwhile restart the server and
    /// keep waiting on the new connection.
    ///
    /// # Errors
    ///
    /// Returns the connection's error if the link fails, or a startup error
    /// from a reconfiguration restart.
    pub async fn wait(&mut self) -> Result<WaitOutcome> {
        let span = self.span.clone();
        self.wait_inner().instrument(span).await
    }

    async fn wait_inner(&mut self) -> Result<WaitOutcome> {
        enum Wake {
            Closed(Result<()>),
            Control(Control),
        }

        loop {
            if self.state != ServerState::Running {
                return Ok(WaitOutcome::NotRunning);
            }
            let Some(connection) = self.connection.as_mut() else {
                return Ok(WaitOutcome::NotRunning);
            };

            let wake = tokio::select! {
                result = connection.wait_for_events() => Wake::Closed(result),
                Some(control) = self.control_rx.recv() => Wake::Control(control),
            };

            match wake {
                Wake::Closed(result) => {
                    info!("Event hub connection ended");
                    self.stop().await;
                    return result.map(|()| WaitOutcome::ConnectionClosed);
                }
                Wake::Control(Control::Stop) => {
                    self.stop().await;
                    return Ok(WaitOutcome::Stopped);
                }
                Wake::Control(Control::SetHandlerPaths(paths)) => {
                    if let Some(StartOutcome::Cancelled) = self.set_handler_paths(paths).await? {
                        return Ok(WaitOutcome::Stopped);
                    }
                }
            }
        }
    }

    /// Start, then wait for events. The usual way to run a server.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`start`](Self::start) and [`wait`](Self::wait).
    pub async fn run(&mut self, connection: Option<C>, load_files: bool) -> Result<WaitOutcome> {
        let outcome = self.start(connection, load_files).await?;
        if !outcome.is_running() {
            return Ok(WaitOutcome::NotRunning);
        }
        self.wait().await
    }
}

impl<C: Connection> Drop for Server<C> {
    fn drop(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
    }
}
