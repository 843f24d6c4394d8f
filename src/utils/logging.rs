use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::{EnvFilter, LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Command and backend-call timings; kept out of the general logs.
pub const TIMING_TARGET: &str = "studio.timing";

/// Full `EnvFilter` directives for the console, e.g. `character_studio=debug`.
const CONSOLE_FILTER_ENV: &str = "STUDIO_LOG";

/// Read from the environment directly so the subscriber is installed before
/// `CONFIG` loads and can report what it found.
#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    pub file_level: LevelFilter,
    /// stdout carries command results, so the console only gets warnings
    /// unless asked for more.
    pub console_level: LevelFilter,
    pub dir: PathBuf,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_values(
            env::var("LOG_LEVEL").ok().as_deref(),
            env::var("LOG_CONSOLE_LEVEL").ok().as_deref(),
            env::var("LOGS_DIR").ok().as_deref(),
        )
    }

    fn from_values(file: Option<&str>, console: Option<&str>, dir: Option<&str>) -> Self {
        LogSettings {
            file_level: file.map(parse_log_level).unwrap_or(LevelFilter::INFO),
            console_level: console.map(parse_log_level).unwrap_or(LevelFilter::WARN),
            dir: PathBuf::from(
                dir.map(str::trim)
                    .filter(|dir| !dir.is_empty())
                    .unwrap_or("logs"),
            ),
        }
    }
}

/// Flushes the file writers when dropped at the end of `main`.
pub struct LoggingGuards {
    _writers: Vec<WorkerGuard>,
}

fn parse_log_level(value: &str) -> LevelFilter {
    match value.trim().to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

/// Studio events at `level`; HTTP and SQL internals only when they warn.
fn general_targets(level: LevelFilter) -> Targets {
    Targets::new()
        .with_default(level)
        .with_target(TIMING_TARGET, LevelFilter::OFF)
        .with_target("hyper", LevelFilter::WARN)
        .with_target("hyper_util", LevelFilter::WARN)
        .with_target("reqwest", LevelFilter::WARN)
        .with_target("sqlx", LevelFilter::WARN)
}

fn timing_targets() -> Targets {
    Targets::new().with_target(TIMING_TARGET, LevelFilter::INFO)
}

fn console_filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::try_from_env(CONSOLE_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()))
}

struct FileWriters {
    text: NonBlocking,
    json: NonBlocking,
    timing: NonBlocking,
}

fn daily_writer(dir: &Path, file_name: &str, guards: &mut Vec<WorkerGuard>) -> NonBlocking {
    let appender = tracing_appender::rolling::daily(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    guards.push(guard);
    writer
}

/// Console on stderr plus daily files under `settings.dir`: `studio.log`,
/// `studio.jsonl` and `timing.jsonl`. Without a usable directory only the
/// console is set up.
pub fn init_logging(settings: &LogSettings) -> LoggingGuards {
    let mut guards = Vec::new();
    let dir_error = fs::create_dir_all(&settings.dir).err();
    let files = dir_error.is_none().then(|| FileWriters {
        text: daily_writer(&settings.dir, "studio.log", &mut guards),
        json: daily_writer(&settings.dir, "studio.jsonl", &mut guards),
        timing: daily_writer(&settings.dir, "timing.jsonl", &mut guards),
    });

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .compact()
        .without_time()
        .with_target(false)
        .with_filter(console_filter(settings.console_level));
    let text_layer = files.as_ref().map(|files| {
        tracing_subscriber::fmt::layer()
            .with_writer(files.text.clone())
            .with_ansi(false)
            .with_filter(general_targets(settings.file_level))
    });
    let json_layer = files.as_ref().map(|files| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(files.json.clone())
            .with_filter(general_targets(settings.file_level))
    });
    let timing_layer = files.as_ref().map(|files| {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_writer(files.timing.clone())
            .with_filter(timing_targets())
    });

    tracing_subscriber::registry()
        .with(console_layer)
        .with(text_layer)
        .with(json_layer)
        .with(timing_layer)
        .init();

    if let Some(err) = dir_error {
        warn!(
            "Could not create logs directory {}: {}; logging to the console only",
            settings.dir.display(),
            err
        );
    }

    LoggingGuards { _writers: guards }
}
