//! Logging configuration and initialization.
//!
//! Adapted from the teacher's `logging::init_logging`: `tracing` with
//! environment-based filtering. The CLI-specific quiet/log-file plumbing is
//! dropped since this crate has no CLI layer of its own -- an embedding
//! application is expected to call [`init_logging`] once at startup with
//! whatever verbosity it has on hand, or install its own subscriber and skip
//! this module entirely.

use std::io::IsTerminal;
use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize a global `tracing` subscriber for the engine's crate target.
///
/// Honors `RUST_LOG` if set; otherwise a default filter is derived from
/// `verbosity` (0 = info, 1 = debug, 2+ = trace).
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(verbosity: u8) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_file(cfg!(debug_assertions))
        .with_line_number(cfg!(debug_assertions))
        .with_ansi(std::io::stderr().is_terminal());

    let subscriber = tracing_subscriber::registry().with(env_filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
}

fn default_filter(verbosity: u8) -> String {
    match verbosity {
        0 => "docstore=info".to_string(),
        1 => "docstore=debug".to_string(),
        2 => "docstore=debug,rusqlite=debug".to_string(),
        _ => "docstore=trace".to_string(),
    }
}

/// Initialize logging for tests with the test writer. Safe to call from
/// every test; only the first call installs a subscriber.
pub fn init_test_logging() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("docstore=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}
