//! Core of the hookd event handler server.
//!
//! - [`loader`]: discovers and loads handler plugins from path templates
//! - [`registrar`]: invokes each plugin's `register` entry point
//! - [`server`]: connection lifecycle and the dispatch wait loop
//! - [`connection`]: the contract an event hub connection implements

pub mod config;
pub mod connection;
pub mod loader;
pub mod registrar;
pub mod server;
pub mod subscription;
pub mod template;

mod error;

#[cfg(test)]
mod tests;

pub use config::Environment;
pub use connection::{Connection, EntryPoint, Event, EventCallback, Subscriber, SubscriptionId};
pub use error::{Error, Result, panic_message};
pub use loader::{HandlerLoader, LoadFailure, LoadReport, LoadedModule, PluginLoader};
pub use registrar::{RegisterFailure, RegistrationReport, register_all};
pub use server::{Server, ServerHandle, ServerState, StartOutcome, StartupReport, WaitOutcome};
pub use subscription::Subscription;
