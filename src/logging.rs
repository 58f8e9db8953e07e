//! # Structured Logging Module
//!
//! Environment-aware structured logging to the console and to a JSON log file
//! per process, for following dispatch and reconciliation across workers.

use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::loader::detect_environment;
use crate::models::{Channel, MessageId};

static LOGGER_INITIALIZED: OnceLock<Option<WorkerGuard>> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = detect_environment();
        let log_level = get_log_level(&environment);

        let log_dir = PathBuf::from("log");
        let file_layer = match fs::create_dir_all(&log_dir) {
            Ok(()) => {
                let pid = process::id();
                let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
                let file_name = format!("{environment}.{pid}.{timestamp}.log");
                let appender = tracing_appender::rolling::never(&log_dir, &file_name);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                Some((writer, guard, log_dir.join(file_name)))
            }
            Err(_) => None,
        };

        let console = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(env_filter(log_level));

        let (file, guard, log_path) = match file_layer {
            Some((writer, guard, path)) => (
                Some(
                    fmt::layer()
                        .with_writer(writer)
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_level(true)
                        .with_ansi(false)
                        .json()
                        .with_filter(env_filter(log_level)),
                ),
                Some(guard),
                Some(path),
            ),
            None => (None, None, None),
        };

        // another subscriber (a test harness, an embedding host) may already be installed
        if tracing_subscriber::registry()
            .with(console)
            .with(file)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            log_file = ?log_path.map(|p| p.display().to_string()),
            "🔧 STRUCTURED LOGGING: Initialized"
        );

        guard
    });
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log one dispatch decision
pub fn log_dispatch_operation(
    operation: &str,
    message_id: &MessageId,
    channel: Channel,
    attempts: u32,
    state: Option<&str>,
    error: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        message_id = %message_id,
        channel = %channel,
        attempts = attempts,
        state = state,
        error = error,
        timestamp = %Utc::now().to_rfc3339(),
        "📨 DISPATCH_OPERATION"
    );
}

/// Log one event-processing decision
pub fn log_event_operation(
    processor: &str,
    outcome: &str,
    message_id: Option<&MessageId>,
    provider_status: Option<&str>,
) {
    tracing::info!(
        processor = %processor,
        outcome = %outcome,
        message_id = message_id.map(MessageId::as_str),
        provider_status = provider_status,
        timestamp = %Utc::now().to_rfc3339(),
        "📬 EVENT_OPERATION"
    );
}
