//! Process-wide log sink
//!
//! The first call to [`init`] installs a `tracing` subscriber and fixes the
//! level for the lifetime of the process. Later calls are no-ops that return
//! the level already in effect.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::EnvFilter;

static LOGGER: OnceLock<Level> = OnceLock::new();

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
    Off,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Error => "error",
            Level::Warn => "warn",
            Level::Info => "info",
            Level::Debug => "debug",
            Level::Trace => "trace",
            Level::Off => "off",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Level::Error),
            "warn" | "warning" => Ok(Level::Warn),
            "info" => Ok(Level::Info),
            "debug" => Ok(Level::Debug),
            "trace" => Ok(Level::Trace),
            "off" => Ok(Level::Off),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// Install the log sink once. `None` level means `warn`; `None` file means
/// stderr. Returns the effective level.
pub fn init(level: Option<Level>, file: Option<&Path>) -> Level {
    *LOGGER.get_or_init(|| {
        let level = level.unwrap_or_default();
        install(level, file);
        level
    })
}

/// Level fixed by the first [`init`], if any
pub fn current_level() -> Option<Level> {
    LOGGER.get().copied()
}

/// Emit one event tagged with `identifier`. Initializes with defaults when
/// nothing was configured yet.
pub fn log(level: Level, identifier: &str, message: &str) {
    if LOGGER.get().is_none() {
        init(None, None);
    }
    match level {
        Level::Error => tracing::error!(identifier, "{}", message),
        Level::Warn => tracing::warn!(identifier, "{}", message),
        Level::Info => tracing::info!(identifier, "{}", message),
        Level::Debug => tracing::debug!(identifier, "{}", message),
        Level::Trace => tracing::trace!(identifier, "{}", message),
        Level::Off => {}
    }
}

fn install(level: Level, file: Option<&Path>) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level.as_str()))
        .with_target(true);

    // A host application may already own the global subscriber
    let _ = match file {
        Some(path) => match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => builder.with_ansi(false).with_writer(Mutex::new(f)).try_init(),
            Err(e) => {
                eprintln!("failed to open log file {}: {}", path.display(), e);
                builder.with_writer(std::io::stderr).try_init()
            }
        },
        None => builder.with_writer(std::io::stderr).try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parse() {
        assert_eq!("DEBUG".parse::<Level>().unwrap(), Level::Debug);
        assert_eq!("warning".parse::<Level>().unwrap(), Level::Warn);
        assert_eq!("off".parse::<Level>().unwrap(), Level::Off);
        assert!("verbose".parse::<Level>().is_err());
        assert_eq!(Level::default(), Level::Warn);
    }

    #[test]
    fn test_init_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("glide.log");

        let first = init(Some(Level::Info), Some(&path));
        assert_eq!(first, Level::Info);

        let second = init(Some(Level::Trace), None);
        assert_eq!(second, Level::Info);
        assert_eq!(current_level(), Some(Level::Info));

        log(Level::Info, "test", "logger initialized");
    }
}
