// Copyright 2024 The Osmocom-BB-rs Authors. Licensed under GPL-2.0-or-later.

//! Process-wide logger setup, modelled on `tikv_util`'s logger module: build
//! a `slog::Logger` over a terminal drain for interactive use or a JSON drain
//! for production, install it as the `slog-global` default, and let every
//! other crate log through the plain `info!`/`warn!`/`debug!`/`error!` macros
//! re-exported below without threading a `Logger` through every call site.

use slog::{o, Drain};

pub use slog_global::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, colorized terminal output. Default for interactive use.
    Text,
    /// Newline-delimited JSON, one object per log line. Used under a
    /// supervisor/log-collector.
    Json,
}

/// Installs the process-wide logger. Must be called exactly once, as early
/// as possible in `main`; every later call to `info!`/`warn!`/etc. from any
/// crate in the workspace routes through the drain configured here.
pub fn init_log(format: LogFormat) {
    let drain = match format {
        LogFormat::Text => {
            let decorator = slog_term::TermDecorator::new().build();
            let drain = slog_term::FullFormat::new(decorator).build().fuse();
            slog_async::Async::new(drain).build().fuse()
        }
        LogFormat::Json => {
            let drain = slog_json::Json::default(std::io::stdout()).fuse();
            slog_async::Async::new(drain).build().fuse()
        }
    };
    let logger = slog::Logger::root(drain, o!());
    slog_global::set_global(logger);
}
