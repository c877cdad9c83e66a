//! Handler directory watcher for hot reload.
//!
//! A background thread owns the `notify` watcher and forwards one signal per
//! burst of filesystem changes, once the burst has gone quiet.

use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use hookd_core::Environment;
use hookd_core::template::substitute;
use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, error, info, warn};

use crate::error::Result;

const DEBOUNCE: Duration = Duration::from_millis(500);

pub struct HandlerWatcher {
    _thread: std::thread::JoinHandle<()>,
}

impl HandlerWatcher {
    /// Watch `roots` recursively, sending `()` on `tx` after changes settle.
    ///
    /// The thread ends when `tx`'s receiver is dropped and the next change
    /// settles.
    #[must_use]
    pub fn spawn(roots: Vec<PathBuf>, tx: tokio_mpsc::UnboundedSender<()>) -> Self {
        let thread = std::thread::spawn(move || {
            if let Err(e) = watch(&roots, &tx) {
                error!("Handler watcher error: {}", e);
            }
        });
        Self { _thread: thread }
    }
}

fn watch(roots: &[PathBuf], tx: &tokio_mpsc::UnboundedSender<()>) -> Result<()> {
    let (raw_tx, raw_rx) = mpsc::channel();

    let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        match result {
            Ok(event) if is_relevant(&event.kind) => {
                let _ = raw_tx.send(());
            }
            Ok(_) => {}
            Err(e) => error!("Watcher error: {}", e),
        }
    })?;

    for root in roots {
        watcher.watch(root, RecursiveMode::Recursive)?;
        info!("Watching handler path: {}", root.display());
    }

    forward_settled(&raw_rx, tx, DEBOUNCE);
    Ok(())
}

/// Forward one signal per burst on `raw_rx`, `window` after its last change.
///
/// Returns when either channel closes.
fn forward_settled(
    raw_rx: &mpsc::Receiver<()>,
    tx: &tokio_mpsc::UnboundedSender<()>,
    window: Duration,
) {
    let mut debounce = Debounce::new(window);
    loop {
        let change = match debounce.remaining(Instant::now()) {
            Some(wait) => raw_rx.recv_timeout(wait),
            None => raw_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match change {
            Ok(()) => debounce.record(Instant::now()),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if debounce.settle(Instant::now()) {
            debug!("Handler changes settled, requesting reload");
            if tx.send(()).is_err() {
                break;
            }
        }
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
    )
}

/// Trailing-edge debounce: a burst settles once `window` passes without a
/// new change.
#[derive(Debug)]
struct Debounce {
    window: Duration,
    last: Option<Instant>,
}

impl Debounce {
    fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    fn record(&mut self, now: Instant) {
        self.last = Some(now);
    }

    /// Time until the pending burst settles, `None` when nothing is pending.
    fn remaining(&self, now: Instant) -> Option<Duration> {
        self.last
            .map(|last| self.window.saturating_sub(now.duration_since(last)))
    }

    /// True once per burst, when it has been quiet for `window`.
    fn settle(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) >= self.window => {
                self.last = None;
                true
            }
            _ => false,
        }
    }
}

/// Expand handler path templates and keep the ones that exist.
#[must_use]
pub fn watch_roots(templates: &[String], env: &Environment) -> Vec<PathBuf> {
    templates
        .iter()
        .map(|template| PathBuf::from(substitute(template, env)))
        .filter(|path| {
            let exists = path.exists();
            if !exists {
                warn!("Not watching missing handler path {}", path.display());
            }
            exists
        })
        .collect()
}
