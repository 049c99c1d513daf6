//! Tracing setup.
//!
//! Console output is human-readable by default or JSON on request. A log
//! file, when configured, receives every event as one JSON object per line
//! regardless of the console format.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::fmt::{self, format::FmtSpan};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// JSON console output, for log collectors
    pub json: bool,
    /// Default to DEBUG instead of INFO
    pub verbose: bool,
    /// Also append JSON events here
    pub file: Option<PathBuf>,
}

/// Install the global subscriber. `RUST_LOG` overrides the default level.
pub fn init(config: LogConfig) -> Result<()> {
    let level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{}={}",
            env!("CARGO_CRATE_NAME"),
            level.as_str().to_lowercase()
        ))
    });

    let console: Box<dyn Layer<Registry> + Send + Sync> = if config.json {
        fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed()
    };

    let file = config
        .file
        .as_deref()
        .map(open_log_file)
        .transpose()?
        .map(|file| fmt::layer().json().with_writer(Mutex::new(file)));

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .with(filter)
        .try_init()
        .context("A global tracing subscriber is already installed")
}

fn open_log_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

/// Lets a repeating event through at most once per interval.
///
/// Events held back in between are counted, so the next one that passes can
/// report how many were dropped.
pub struct LogThrottle {
    interval: Duration,
    last: Option<Instant>,
    suppressed: u64,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
            suppressed: 0,
        }
    }

    /// `Some(dropped)` when the event should be logged now, together with
    /// the number suppressed since the last one; `None` otherwise.
    pub fn admit(&mut self) -> Option<u64> {
        self.admit_at(Instant::now())
    }

    fn admit_at(&mut self, now: Instant) -> Option<u64> {
        let due = self
            .last
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval);
        if !due {
            self.suppressed += 1;
            return None;
        }
        self.last = Some(now);
        Some(std::mem::take(&mut self.suppressed))
    }
}
