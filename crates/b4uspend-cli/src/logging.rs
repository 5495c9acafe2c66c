//! Logging configuration and initialization.
//!
//! Logs go to stderr so command output on stdout stays machine-readable.
//! Presets pick a baseline per target; `--log target=level` overrides it;
//! `RUST_LOG` replaces everything when set.

use std::collections::HashMap;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Invalid log format: '{}'. Use 'text' or 'json'.", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogPreset {
    /// Session transitions and problems only
    #[default]
    Production,
    /// Adds renewal and cache activity
    Verbose,
    Debug,
    /// Everything, including per-request HTTP lines
    Trace,
    /// Errors only
    Quiet,
}

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub preset: LogPreset,
    /// Full target -> level, e.g. "b4uspend::guard" -> DEBUG
    pub overrides: HashMap<String, Level>,
    pub format: LogFormat,
}

/// Targets outside our namespace that may be named directly.
const FOREIGN_TARGETS: &[&str] = &["reqwest", "hyper", "rusqlite"];

impl LogConfig {
    pub fn from_cli(
        verbose: bool,
        debug: bool,
        trace: bool,
        quiet: bool,
        log_overrides: Vec<String>,
        format: LogFormat,
    ) -> Self {
        let preset = if quiet {
            LogPreset::Quiet
        } else if trace {
            LogPreset::Trace
        } else if debug {
            LogPreset::Debug
        } else if verbose {
            LogPreset::Verbose
        } else {
            LogPreset::Production
        };

        // "guard=debug" -> "b4uspend::guard=debug"; comma-separated lists allowed
        let mut overrides = HashMap::new();
        for part in log_overrides.iter().flat_map(|s| s.split(',')) {
            let Some((target, level)) = part.split_once('=') else {
                continue;
            };
            let target = target.trim();
            let full_target = if target.starts_with("b4uspend::")
                || FOREIGN_TARGETS.iter().any(|t| target.starts_with(t))
            {
                target.to_string()
            } else {
                format!("b4uspend::{}", target)
            };
            if let Some(level) = parse_level(level.trim()) {
                overrides.insert(full_target, level);
            }
        }

        Self {
            preset,
            overrides,
            format,
        }
    }

    pub fn directives(&self) -> Vec<String> {
        let mut directives: Vec<String> = match self.preset {
            LogPreset::Production => vec![
                "b4uspend=warn".into(),
                "b4uspend::session=info".into(),
                "reqwest=warn".into(),
            ],
            LogPreset::Verbose => vec![
                "b4uspend=info".into(),
                "b4uspend::cache=debug".into(),
                "b4uspend::guard=debug".into(),
                "reqwest=warn".into(),
            ],
            LogPreset::Debug => vec![
                "b4uspend=debug".into(),
                "reqwest=info".into(),
            ],
            LogPreset::Trace => vec![
                "b4uspend=trace".into(),
                "reqwest=debug".into(),
                "hyper=debug".into(),
            ],
            LogPreset::Quiet => vec![
                "b4uspend=error".into(),
                "reqwest=error".into(),
            ],
        };

        let mut overrides: Vec<_> = self.overrides.iter().collect();
        overrides.sort();
        for (target, level) in overrides {
            directives.push(format!("{}={}", target, level.as_str().to_lowercase()));
        }
        directives
    }

    /// `RUST_LOG` if set, otherwise the preset plus overrides.
    pub fn build_filter(&self) -> EnvFilter {
        if let Ok(env_filter) = EnvFilter::try_from_default_env() {
            return env_filter;
        }
        EnvFilter::try_new(self.directives().join(",")).unwrap_or_else(|_| EnvFilter::new("warn"))
    }
}

fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

pub fn init(config: &LogConfig) {
    let filter = config.build_filter();

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .without_time(),
                )
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr).with_target(true))
                .init();
        }
    }
}
