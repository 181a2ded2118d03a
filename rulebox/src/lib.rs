//! Rulebox engine library.
//!
//! An in-process rule engine for a multi-tenant data platform: each cell owns
//! declarative rules of the shape "when an event matching this predicate
//! arrives, run that action". The engine keeps a live, per-cell index of
//! rules and their box linkages, matches the inbound event stream against it,
//! queues actions on a bounded worker pool, and replays control-plane events
//! (rule/box/cell changes) into the index.

use std::path::Path;
use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

// Global guard for tracing-appender to keep the writer thread alive
static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

pub mod broker;
pub mod config;
pub mod engine;
pub mod index;
pub mod keys;
pub mod locks;
pub mod matcher;
pub mod store;
pub mod timer;
pub mod uri;
pub mod workers;

pub use rulebox_shared::{EngineError, EngineResult, Event, event};

pub use broker::{EventPublisher, LocalBroker};
pub use config::EngineOptions;
pub use engine::RuleEngine;
pub use index::{Action, ActionInfo, BoxEntry, RuleIndex, RuleInfo};
pub use locks::{CellLockManager, CellStatus, InMemoryCellLocks};
pub use store::{BoxRecord, CellRecord, CellStore, InMemoryCellStore, RuleRecord};
pub use timer::{TimerRule, TimerSink};
pub use workers::ActionRunner;

/// Initialize tracing for the engine, writing to `<log_dir>/rulebox.log`.
///
/// Daily rotation; filtering via the `RUST_LOG` environment variable
/// (defaults to `info`). Idempotent: subsequent calls return immediately once
/// initialized, and a subscriber already installed by the host is left in
/// place.
pub fn init_logging(log_dir: &Path) -> EngineResult<()> {
    std::fs::create_dir_all(log_dir).map_err(|e| {
        EngineError::Config(format!(
            "Failed to create logs directory {}: {}",
            log_dir.display(),
            e
        ))
    })?;

    let _ = LOG_GUARD.get_or_init(|| {
        let file_appender = tracing_appender::rolling::daily(log_dir, "rulebox.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("info"))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(non_blocking)
            .with_ansi(false)
            .finish();

        // If a global default subscriber is already set, this returns an
        // error; we ignore it to avoid interfering with host tracing.
        let _ = tracing::subscriber::set_global_default(subscriber);

        guard
    });

    Ok(())
}
