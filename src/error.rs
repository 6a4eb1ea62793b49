use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in data collectors
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Failed to spawn subprocess: {0}")]
    SubprocessSpawn(String),

    #[error("Subprocess terminated unexpectedly: {0}")]
    SubprocessTerminated(String),

    #[error("Failed to parse output: {0}")]
    ParseError(String),

    #[error("Source not available: {}", .0.display())]
    SourceUnavailable(PathBuf),

    #[error("Command `{command}` exited with status {status}")]
    CommandFailed { command: String, status: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CollectorError {
    /// Whether the error means the source is not present (yet), as opposed to a
    /// read or parse failure
    pub fn is_unavailable(&self) -> bool {
        match self {
            CollectorError::SourceUnavailable(_) => true,
            CollectorError::IoError(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_io_error_is_unavailable() {
        let err = CollectorError::from(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "gone",
        ));
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_parse_error_is_not_unavailable() {
        let err = CollectorError::ParseError("short line".to_string());
        assert!(!err.is_unavailable());
        assert!(CollectorError::SourceUnavailable(PathBuf::from("/x")).is_unavailable());
    }
}
