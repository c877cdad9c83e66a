//! Invokes handler entry points against the live connection.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::connection::Subscriber;
use crate::error::panic_message;
use crate::loader::LoadedModule;

/// A handler whose `register` call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFailure {
    pub path: PathBuf,
    pub detail: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegistrationReport {
    /// Handlers registered successfully, in invocation order.
    pub registered: Vec<PathBuf>,
    pub failures: Vec<RegisterFailure>,
}

/// Call every entry point with `hub`, in discovery order.
///
/// A failing or panicking handler is logged and recorded; the rest still run.
pub fn register_all(modules: &[LoadedModule], hub: &mut dyn Subscriber) -> RegistrationReport {
    let mut report = RegistrationReport::default();

    for module in modules {
        let outcome = catch_unwind(AssertUnwindSafe(|| module.entry_point.register(&mut *hub)));

        let detail = match outcome {
            Ok(Ok(())) => {
                debug!("Registered handler {}", module.path.display());
                report.registered.push(module.path.clone());
                continue;
            }
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("register panicked: {}", panic_message(payload.as_ref())),
        };

        warn!(
            "\"{}\" - register was not successful: {}",
            module.path.display(),
            detail
        );
        report.failures.push(RegisterFailure {
            path: module.path.clone(),
            detail,
        });
    }

    let msg = "Registration of event handlers has finished!";
    info!("{}", "*".repeat(msg.len()));
    info!(
        "{} ({} registered, {} failed)",
        msg,
        report.registered.len(),
        report.failures.len()
    );

    report
}
