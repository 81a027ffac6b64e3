//! Logging integration for strata.
//!
//! Provides helpers for configuring [`tracing`]-based logging from
//! [`Settings`](crate::settings::Settings) and for creating per-run spans.

use crate::settings::Settings;

/// Sets up the global tracing subscriber based on the given settings.
///
/// The log level is read from `settings.log_level` (e.g. "debug", "info", "warn",
/// "error", or a full `EnvFilter` directive). In debug mode a pretty,
/// human-readable format is used; otherwise a structured JSON format is used.
///
/// Installing a second subscriber is silently ignored.
pub fn setup_logging(settings: &Settings) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.debug {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .pretty()
            .try_init()
            .ok();
    } else {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .ok();
    }
}

/// Creates a tracing span for one migration run.
///
/// Every log entry emitted while the span is entered carries the database
/// name and the requested target version.
///
/// # Examples
///
/// ```
/// use strata_core::logging::migration_span;
///
/// let span = migration_span("shop", Some("2.0.0"));
/// let _guard = span.enter();
/// tracing::info!("migrating");
/// ```
pub fn migration_span(database: &str, target: Option<&str>) -> tracing::Span {
    tracing::info_span!("migration", database, target = target.unwrap_or("latest"))
}
