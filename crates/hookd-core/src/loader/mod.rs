mod manifest;
mod walk;

pub use manifest::{CommandSubscription, ManifestLoader, RegisterSpec};
pub use walk::{IgnorePatterns, PluginFile, walk};

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::config::Environment;
use crate::connection::EntryPoint;
use crate::error::panic_message;
use crate::template;
use crate::{Error, Result};

/// Conventional name of the registration entry point.
pub const ENTRY_POINT: &str = "register";

/// A top-level symbol exported by a loaded module.
#[derive(Clone)]
pub enum Symbol {
    /// A callable with the entry point signature.
    Callable(Arc<dyn EntryPoint>),
    /// Anything else; the string names what it is, for diagnostics.
    Other(String),
}

impl std::fmt::Debug for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Symbol::Callable(_) => f.write_str("Callable"),
            Symbol::Other(kind) => f.debug_tuple("Other").field(kind).finish(),
        }
    }
}

/// A successfully loaded plugin file and the symbols it exposes.
#[derive(Debug, Clone, Default)]
pub struct PluginModule {
    symbols: HashMap<String, Symbol>,
}

impl PluginModule {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_symbol(mut self, name: impl Into<String>, symbol: Symbol) -> Self {
        self.symbols.insert(name.into(), symbol);
        self
    }

    #[must_use]
    pub fn with_entry_point(self, name: impl Into<String>, entry: impl EntryPoint + 'static) -> Self {
        self.with_symbol(name, Symbol::Callable(Arc::new(entry)))
    }

    #[must_use]
    pub fn symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }
}

/// Turns plugin files into modules.
pub trait PluginLoader: Send + Sync {
    /// Whether this loader handles `path`.
    fn accepts(&self, path: &Path) -> bool;

    /// Load `file`.
    ///
    /// # Errors
    ///
    /// Any error is recorded as a [`LoadFailure`] for this file only.
    fn load(&self, file: &PluginFile) -> Result<PluginModule>;
}

/// A plugin file whose `register` entry point was found.
#[derive(Clone)]
pub struct LoadedModule {
    pub path: PathBuf,
    pub entry_point: Arc<dyn EntryPoint>,
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// A plugin file that could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub path: PathBuf,
    pub detail: String,
}

/// Why a loaded module contributed no entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingEntryPoint,
    NotCallable(String),
}

/// Outcome of one load pass over all handler paths.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Entry points in discovery order.
    pub modules: Vec<LoadedModule>,
    pub failures: Vec<LoadFailure>,
    pub skipped: Vec<(PathBuf, SkipReason)>,
}

/// Resolves handler path templates and loads the plugin files under them.
pub struct HandlerLoader {
    loaders: Vec<Box<dyn PluginLoader>>,
    ignore: IgnorePatterns,
}

impl Default for HandlerLoader {
    fn default() -> Self {
        Self::new().with_loader(ManifestLoader)
    }
}

impl HandlerLoader {
    /// A loader with no plugin formats registered.
    #[must_use]
    pub fn new() -> Self {
        Self {
            loaders: Vec::new(),
            ignore: IgnorePatterns::default(),
        }
    }

    /// Add a plugin format. Earlier loaders win when several accept a file.
    #[must_use]
    pub fn with_loader(mut self, loader: impl PluginLoader + 'static) -> Self {
        self.loaders.push(Box::new(loader));
        self
    }

    /// Load every plugin file under `templates`, in order.
    ///
    /// Never fails: broken files become [`LoadFailure`]s and modules without
    /// an entry point are skipped.
    pub fn load_paths(&self, templates: &[String], env: &Environment) -> LoadReport {
        let mut report = LoadReport::default();

        for raw in templates {
            let resolved = template::substitute(raw, env);
            if resolved != *raw {
                debug!("Resolved handler path {} -> {}", raw, resolved);
            }

            for file in walk(Path::new(&resolved), &self.ignore) {
                self.load_file(&file, &mut report);
            }
        }

        if report.modules.is_empty() {
            warn!(
                "There are no handlers with a `{}` entry point in handler paths: \"{}\"",
                ENTRY_POINT,
                templates.join("| ")
            );
        } else {
            info!(
                "Loaded {} handlers ({} failed, {} skipped)",
                report.modules.len(),
                report.failures.len(),
                report.skipped.len()
            );
        }

        report
    }

    fn load_file(&self, file: &PluginFile, report: &mut LoadReport) {
        let Some(loader) = self.loaders.iter().find(|l| l.accepts(&file.path)) else {
            trace!("No loader for {}", file.path.display());
            return;
        };

        let module = match catch_unwind(AssertUnwindSafe(|| loader.load(file))) {
            Ok(Ok(module)) => module,
            Ok(Err(e)) => {
                record_failure(report, file, e.to_string());
                return;
            }
            Err(payload) => {
                let err = Error::Plugin(format!(
                    "loader panicked: {}",
                    panic_message(payload.as_ref())
                ));
                record_failure(report, file, err.to_string());
                return;
            }
        };

        match module.symbol(ENTRY_POINT) {
            Some(Symbol::Callable(entry_point)) => {
                debug!("Loaded handler {}", file.path.display());
                report.modules.push(LoadedModule {
                    path: file.path.clone(),
                    entry_point: Arc::clone(entry_point),
                });
            }
            Some(Symbol::Other(kind)) => {
                warn!(
                    "\"{}\" - `{}` is {}, not a handler definition",
                    file.path.display(),
                    ENTRY_POINT,
                    kind
                );
                report.skipped.push((
                    file.path.clone(),
                    SkipReason::NotCallable(kind.clone()),
                ));
            }
            None => {
                warn!(
                    "\"{}\" - Missing `{}` entry point",
                    file.path.display(),
                    ENTRY_POINT
                );
                report
                    .skipped
                    .push((file.path.clone(), SkipReason::MissingEntryPoint));
            }
        }
    }
}

fn record_failure(report: &mut LoadReport, file: &PluginFile, detail: String) {
    warn!("Failed to load handler {}:\n{}", file.path.display(), detail);
    report.failures.push(LoadFailure {
        path: file.path.clone(),
        detail,
    });
}
