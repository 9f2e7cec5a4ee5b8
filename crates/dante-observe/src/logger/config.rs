use std::io::IsTerminal;

use crate::logger::format::LoggerFormat;

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    /// `EnvFilter` directive string, e.g. `info` or `warn,dante.core=debug`.
    pub level: String,
    pub with_targets: bool,
    pub use_color: bool,
}

impl LoggerConfig {
    pub fn new(format: LoggerFormat, level: impl Into<String>) -> Self {
        Self {
            format,
            level: level.into(),
            ..Self::default()
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        // Logs go to stderr, so colour follows stderr rather than stdout.
        let use_color = std::io::stderr().is_terminal();
        Self {
            format: LoggerFormat::Text,
            level: "info".to_string(),
            with_targets: true,
            use_color,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_overrides_format_and_level() {
        let cfg = LoggerConfig::new(LoggerFormat::Json, "debug");
        assert_eq!(cfg.format, LoggerFormat::Json);
        assert_eq!(cfg.level, "debug");
        assert!(cfg.with_targets);
    }
}
