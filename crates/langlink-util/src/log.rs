//! Tracing setup for hosts embedding langlink.
//!
//! Library code only emits events; a host installs a subscriber once with [`init`].

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Target of the events re-emitted from a server's stderr.
pub const SERVER_OUTPUT_TARGET: &str = "langlink_lsp::server";

/// Verbosity of the client's own events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    const NAMES: [(&'static str, LogLevel); 5] = [
        ("trace", LogLevel::Trace),
        ("debug", LogLevel::Debug),
        ("info", LogLevel::Info),
        ("warn", LogLevel::Warn),
        ("error", LogLevel::Error),
    ];

    pub fn as_str(&self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|(_, level)| level == self)
            .map_or("info", |(name, _)| name)
    }

    /// Case-insensitive; `warning` is accepted for `warn`.
    pub fn parse(s: &str) -> Option<Self> {
        let name = s.trim().to_ascii_lowercase();
        let name = if name == "warning" { "warn" } else { name.as_str() };
        Self::NAMES
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, level)| *level)
    }
}

/// How a host wants the client's events reported.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Write events to stderr. Without it only host-attached layers see them.
    pub stderr: bool,
    /// Level used when `RUST_LOG` is unset.
    pub level: LogLevel,
    /// Level for lines a server writes to its stderr; `None` follows `level`.
    pub server_output: Option<LogLevel>,
    pub include_location: bool,
}

impl LogConfig {
    pub fn with_level(level: LogLevel) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    /// Filter for this configuration. A valid `RUST_LOG` replaces the base level.
    pub fn filter(&self) -> EnvFilter {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str()));
        match self.server_output {
            Some(level) => {
                let directive = format!("{SERVER_OUTPUT_TARGET}={}", level.as_str());
                match directive.parse() {
                    Ok(directive) => filter.add_directive(directive),
                    Err(_) => filter,
                }
            }
            None => filter,
        }
    }
}

/// Install the global subscriber. A second call leaves the first one in place.
pub fn init(config: LogConfig) {
    let registry = tracing_subscriber::registry().with(config.filter());
    let installed = if config.stderr {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .try_init()
    } else {
        registry.try_init()
    };

    if let Err(e) = installed {
        tracing::debug!(error = %e, "Subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_levels() {
        assert_eq!(LogLevel::parse("Debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse(" warning "), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("verbose"), None);
        assert!(LogLevel::Trace < LogLevel::Error);
    }

    #[test]
    fn test_names_round_trip() {
        for (name, level) in LogLevel::NAMES {
            assert_eq!(level.as_str(), name);
            assert_eq!(LogLevel::parse(name), Some(level));
        }
    }

    #[test]
    fn test_server_output_directive() {
        let config = LogConfig {
            server_output: Some(LogLevel::Warn),
            ..LogConfig::with_level(LogLevel::Debug)
        };
        assert!(config.filter().to_string().contains("langlink_lsp::server=warn"));
    }

    #[test]
    fn test_init_twice() {
        init(LogConfig::default());
        init(LogConfig::with_level(LogLevel::Trace));
    }
}
