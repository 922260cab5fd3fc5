//! # switchboard-telemetry
//!
//! Structured logging setup plus the call-record sinks the resilience layer
//! reports to. Records carry shapes (counts and character totals), never raw
//! message content, and are queryable by call sequence number.

#![deny(unsafe_code)]

mod calls;
mod sqlite;

pub use calls::{
    CallEvent, CallRecord, CallSink, FailureInfo, MemoryCallSink, RequestShape, ResponseShape,
    TracingCallSink, timestamp_now,
};
pub use sqlite::{CallQuery, SqliteCallSink};

use std::path::PathBuf;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Errors raised while setting up telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The call database could not be opened or queried.
    #[error("call store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// The directory holding the call database could not be created.
    #[error("call store directory: {0}")]
    Io(#[from] std::io::Error),
    /// A global subscriber was already installed.
    #[error("subscriber init failed: {0}")]
    Init(String),
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by `RUST_LOG`.
    pub log_level: Level,
    /// Per-module level overrides (e.g. `switchboard_llm` => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Persist call records to SQLite at this path.
    pub call_db_path: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            call_db_path: None,
        }
    }
}

impl TelemetryConfig {
    /// `EnvFilter` directive string built from the configured levels.
    pub fn filter_directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{module}={}", level.to_string().to_lowercase()));
        }
        filter
    }
}

/// Holds the sinks created during [`init_telemetry`].
pub struct TelemetryGuard {
    call_sink: Arc<dyn CallSink>,
    sqlite: Option<Arc<SqliteCallSink>>,
}

impl TelemetryGuard {
    /// The sink to hand to the provider registry.
    pub fn call_sink(&self) -> Arc<dyn CallSink> {
        Arc::clone(&self.call_sink)
    }

    /// The SQLite store, when one was configured.
    pub fn call_store(&self) -> Option<&SqliteCallSink> {
        self.sqlite.as_deref()
    }
}

/// Install the global JSON subscriber and build the call sink. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_span_list(true)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TelemetryError::Init(e.to_string()))?;

    build_guard(&config)
}

fn build_guard(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    match &config.call_db_path {
        Some(path) => {
            let sink = Arc::new(SqliteCallSink::new(path)?);
            Ok(TelemetryGuard {
                call_sink: sink.clone(),
                sqlite: Some(sink),
            })
        }
        None => Ok(TelemetryGuard {
            call_sink: Arc::new(TracingCallSink),
            sqlite: None,
        }),
    }
}
