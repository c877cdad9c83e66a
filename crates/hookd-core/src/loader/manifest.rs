//! JSON handler manifests.
//!
//! A manifest's top-level keys are the symbols of the module. The `register`
//! key holds the handler definition: a list of subscriptions, each running a
//! command when a matching event arrives.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tracing::{debug, error, info, warn};

use super::{PluginFile, PluginLoader, PluginModule, Symbol};
use crate::connection::{EntryPoint, Event, EventCallback, Subscriber};
use crate::{Error, Result};

const MANIFEST_EXTENSION: &str = "json";
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;

/// The `register` entry of a handler manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegisterSpec {
    pub subscriptions: Vec<CommandSubscription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSubscription {
    /// Subscription expression, e.g. `topic=studio.update`
    pub subscription: String,

    /// Command line run for each matching event, relative to the manifest's directory
    pub command: String,

    /// Seconds before a running command is killed
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl CommandSubscription {
    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS))
    }
}

/// Loads `*.json` handler manifests.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestLoader;

impl PluginLoader for ManifestLoader {
    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(MANIFEST_EXTENSION))
    }

    fn load(&self, file: &PluginFile) -> Result<PluginModule> {
        let content = std::fs::read_to_string(&file.path)?;
        let value: Value = serde_json::from_str(&content).map_err(|e| {
            Error::Plugin(format!(
                "Failed to parse manifest at {}: {}",
                file.path.display(),
                e
            ))
        })?;

        let Value::Object(symbols) = value else {
            return Err(Error::Plugin(format!(
                "Manifest at {} is not a JSON object",
                file.path.display()
            )));
        };

        let plugin = symbols
            .get("name")
            .and_then(Value::as_str)
            .map_or_else(|| plugin_name(&file.path), String::from);

        let mut module = PluginModule::new();
        for (name, value) in symbols {
            let symbol = if name == super::ENTRY_POINT {
                match serde_json::from_value::<RegisterSpec>(value.clone()) {
                    Ok(spec) => Symbol::Callable(Arc::new(CommandHandlers {
                        plugin: plugin.clone(),
                        dir: file.dir.clone(),
                        spec,
                    })),
                    Err(e) => Symbol::Other(format!("{} ({e})", json_kind(&value))),
                }
            } else {
                Symbol::Other(json_kind(&value).to_string())
            };
            module = module.with_symbol(name, symbol);
        }

        Ok(module)
    }
}

fn plugin_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("handler")
        .to_string()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Entry point built from a manifest's `register` definition.
#[derive(Debug, Clone)]
struct CommandHandlers {
    plugin: String,
    dir: PathBuf,
    spec: RegisterSpec,
}

impl EntryPoint for CommandHandlers {
    fn register(&self, hub: &mut dyn Subscriber) -> Result<()> {
        if self.spec.subscriptions.is_empty() {
            return Err(Error::Register(format!(
                "{} declares no subscriptions",
                self.plugin
            )));
        }

        for sub in &self.spec.subscriptions {
            if sub.command.split_whitespace().next().is_none() {
                return Err(Error::Register(format!(
                    "{}: empty command for subscription '{}'",
                    self.plugin, sub.subscription
                )));
            }
        }

        for sub in &self.spec.subscriptions {
            let runner = CommandRunner {
                plugin: self.plugin.clone(),
                dir: self.dir.clone(),
                command: sub.command.clone(),
                timeout: sub.timeout(),
            };
            let callback: EventCallback = Arc::new(move |event: &Event| runner.dispatch(event));
            let id = hub.subscribe(&sub.subscription, callback)?;
            debug!(
                "[{}] Subscribed '{}' as {}",
                self.plugin, sub.subscription, id
            );
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CommandRunner {
    plugin: String,
    dir: PathBuf,
    command: String,
    timeout: Duration,
}

impl CommandRunner {
    fn dispatch(&self, event: &Event) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(
                "[{}] No async runtime to run handler for event {}",
                self.plugin, event.topic
            );
            return;
        };

        let payload = match serde_json::to_vec(event) {
            Ok(payload) => payload,
            Err(e) => {
                error!("[{}] Failed to serialize event: {}", self.plugin, e);
                return;
            }
        };

        let runner = self.clone();
        runtime.spawn(async move { runner.run(payload).await });
    }

    async fn run(self, payload: Vec<u8>) {
        let parts: Vec<&str> = self.command.split_whitespace().collect();
        let Some((program, args)) = parts.split_first() else {
            return;
        };

        // Relative programs with a directory part resolve against the manifest's directory
        let program = Path::new(program);
        let program = if program.is_relative() && program.components().count() > 1 {
            self.dir.join(program)
        } else {
            program.to_path_buf()
        };

        let spawned = Command::new(&program)
            .args(args)
            .current_dir(&self.dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!("[{}] Failed to spawn '{}': {}", self.plugin, self.command, e);
                return;
            }
        };

        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_logger(self.plugin.clone(), stderr);
        }

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&payload).await {
                warn!("[{}] Failed to write event to handler: {}", self.plugin, e);
            }
            drop(stdin);
        }

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                debug!("[{}] Handler finished", self.plugin);
            }
            Ok(Ok(status)) => {
                warn!("[{}] Handler exited with status: {}", self.plugin, status);
            }
            Ok(Err(e)) => {
                warn!("[{}] Failed to wait for handler: {}", self.plugin, e);
            }
            Err(_) => {
                info!(
                    "[{}] Handler exceeded {:?}, killing it",
                    self.plugin, self.timeout
                );
                if let Err(e) = child.kill().await {
                    warn!("[{}] Failed to kill handler: {}", self.plugin, e);
                }
            }
        }
    }
}

fn spawn_stderr_logger(plugin: String, stderr: ChildStderr) {
    tokio::spawn(async move {
        let reader = BufReader::new(stderr);
        let mut lines = reader.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!("[{}] handler stderr: {}", plugin, line);
        }
    });
}
