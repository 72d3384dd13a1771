//! Injected logging handle.
//!
//! The store never writes through the process-wide `log` macros. Callers hand
//! it a [`StoreLog`] at construction time; binaries usually pass
//! [`StoreLog::global`] after installing `env_logger`, tests pass a capturing
//! logger or [`StoreLog::discard`].

use log::{Level, Log, Metadata, Record};
use std::fmt;
use std::sync::Arc;

const DEFAULT_TARGET: &str = "detection_store";

#[derive(Clone)]
pub struct StoreLog {
    logger: Arc<dyn Log>,
    target: &'static str,
}

impl StoreLog {
    pub fn new(logger: Arc<dyn Log>) -> Self {
        Self {
            logger,
            target: DEFAULT_TARGET,
        }
    }

    /// Forwards to whatever logger the binary installed with `log::set_logger`.
    pub fn global() -> Self {
        Self::new(Arc::new(GlobalLogger))
    }

    pub fn discard() -> Self {
        Self::new(Arc::new(DiscardLogger))
    }

    pub fn with_target(mut self, target: &'static str) -> Self {
        self.target = target;
        self
    }

    pub fn target(&self) -> &'static str {
        self.target
    }

    pub(crate) fn emit(&self, level: Level, args: fmt::Arguments<'_>) {
        let metadata = Metadata::builder().level(level).target(self.target).build();
        if !self.logger.enabled(&metadata) {
            return;
        }
        self.logger
            .log(&Record::builder().metadata(metadata).args(args).build());
    }

    pub(crate) fn debug(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Debug, args);
    }

    pub(crate) fn info(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Info, args);
    }

    pub(crate) fn warn(&self, args: fmt::Arguments<'_>) {
        self.emit(Level::Warn, args);
    }
}

impl fmt::Debug for StoreLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreLog")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

struct GlobalLogger;

impl Log for GlobalLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        log::logger().enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        log::logger().log(record);
    }

    fn flush(&self) {
        log::logger().flush();
    }
}

struct DiscardLogger;

impl Log for DiscardLogger {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        false
    }

    fn log(&self, _record: &Record<'_>) {}

    fn flush(&self) {}
}
