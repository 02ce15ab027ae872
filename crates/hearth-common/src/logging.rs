//! ---
//! hearth_section: "01-core-functionality"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Tracing setup for the Hearth daemon: stdout plus a daily rolling file."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

/// Filter override read before `RUST_LOG`.
pub const LOG_ENV: &str = "HEARTH_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

/// Writer guards must outlive the subscriber or buffered lines are lost.
static GUARDS: OnceCell<[WorkerGuard; 2]> = OnceCell::new();

/// Stdout encoding for daemon logs. The rolling file is always JSON.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Pick the filter directive: `HEARTH_LOG`, then `RUST_LOG`, then `info`.
/// An unparsable directive falls through to the next source.
pub fn resolve_filter(hearth_log: Option<&str>, rust_log: Option<&str>) -> EnvFilter {
    [hearth_log, rust_log]
        .into_iter()
        .flatten()
        .find_map(|directive| match EnvFilter::try_new(directive) {
            Ok(filter) => Some(filter),
            Err(err) => {
                eprintln!("ignoring log directive {:?}: {}", directive, err);
                None
            }
        })
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}

fn log_file_name(service_name: &str, config: &LoggingConfig) -> String {
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
    format!("{}.log", prefix)
}

fn prepare_directory(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("unable to create log directory {}", dir.display()))
}

/// Install the global subscriber. Calling it again is harmless: the first
/// subscriber stays in place.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    prepare_directory(&config.directory)?;

    let appender = rolling::daily(&config.directory, log_file_name(service_name, config));
    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let _ = GUARDS.set([file_guard, stdout_guard]);

    let filter = resolve_filter(
        std::env::var(LOG_ENV).ok().as_deref(),
        std::env::var("RUST_LOG").ok().as_deref(),
    );

    let stdout_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };
    let file_layer = fmt::layer()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .with_writer(file_writer)
        .boxed();

    if tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .is_ok()
    {
        info!(
            service = service_name,
            log_dir = %config.directory.display(),
            format = ?config.format,
            "logging ready"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hearth_log_wins_over_rust_log() {
        let filter = resolve_filter(Some("hearth_core=trace"), Some("warn"));
        assert_eq!(filter.to_string(), "hearth_core=trace");
    }

    #[test]
    fn invalid_directive_falls_through() {
        let filter = resolve_filter(Some("hearth_core=loud"), Some("debug"));
        assert_eq!(filter.to_string(), "debug");
        assert_eq!(resolve_filter(None, None).to_string(), "info");
    }

    #[test]
    fn file_prefix_defaults_to_service_name() {
        let mut config = LoggingConfig::default();
        config.file_prefix = None;
        assert_eq!(log_file_name("hearthd", &config), "hearthd.log");
        config.file_prefix = Some("node-a".into());
        assert_eq!(log_file_name("hearthd", &config), "node-a.log");
    }
}
