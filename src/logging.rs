/// Logging setup and per-component log handles.
///
/// The binaries install a `flexi_logger` backend once at startup. Library
/// components never reach for global state of their own: each one is handed
/// a `ComponentLog` at construction, which tags every line with the
/// component name (used as the log target) and the current virtual time.
use crate::engine::SimTime;
use flexi_logger::{FlexiLoggerError, Logger, LoggerHandle};
use std::fmt;

/// Installs the global log backend. `spec` is used when `RUST_LOG` is unset.
/// Keep the returned handle alive for the lifetime of the program.
pub fn initialize(spec: &str) -> Result<LoggerHandle, FlexiLoggerError> {
    Logger::try_with_env_or_str(spec)?.start()
}

/// Log handle owned by one simulator component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentLog {
    component: &'static str,
}

impl ComponentLog {
    pub const fn new(component: &'static str) -> Self {
        ComponentLog { component }
    }

    pub fn component(&self) -> &'static str {
        self.component
    }

    pub fn info(&self, now: SimTime, args: fmt::Arguments<'_>) {
        log::info!(target: self.component, "[@ {}] {}", now, args);
    }

    pub fn debug(&self, now: SimTime, args: fmt::Arguments<'_>) {
        log::debug!(target: self.component, "[@ {}] {}", now, args);
    }

    pub fn warn(&self, now: SimTime, args: fmt::Arguments<'_>) {
        log::warn!(target: self.component, "[@ {}] {}", now, args);
    }

    pub fn error(&self, now: SimTime, args: fmt::Arguments<'_>) {
        log::error!(target: self.component, "[@ {}] {}", now, args);
    }
}
