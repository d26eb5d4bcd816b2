//! Error taxonomy for the record-production core.
//!
//! Errors are grouped by the layer that raises them:
//! - [`FormatError`]: registry lookups, sample reading, synthesis
//! - [`GeneratorError`]: generator construction and per-call production
//! - [`TransportError`]: open/write/flush/close on an endpoint
//! - [`ChannelError`]: a channel's view of the above
//! - [`ManagerError`]: whole-process startup failures
//! - [`ConfigError`]: loading and validating the JSON configuration

use std::path::PathBuf;

/// Registry and encoding errors
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("format {0:?} already registered")]
    DuplicateFormat(String),
    #[error("unknown format: {0}")]
    UnknownFormat(String),
    #[error("failed to read sample log: {0}")]
    SampleRead(#[from] csv::Error),
    #[error("record generation failed: {0}")]
    Generation(String),
}

/// Errors raised while building a generator or producing a record
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("unknown format {0}")]
    UnknownFormat(String),
    #[error("invalid mode: {0} (must be 'replay' or 'synthetic')")]
    InvalidMode(String),
    #[error("sample_file is required for replay mode")]
    MissingSampleFile,
    #[error("failed to open sample file {path}: {source}")]
    SampleFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse sample file: {0}")]
    Parse(#[source] FormatError),
    #[error("no records found in sample file {0}")]
    NoRecords(PathBuf),
    #[error("end of sample file reached after {count} records")]
    EndOfSample { count: usize },
    #[error("synthetic generation failed: {0}")]
    Generation(#[source] FormatError),
}

impl GeneratorError {
    /// True for the per-call "replay ran out" condition, which callers
    /// treat as recoverable.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::EndOfSample { .. })
    }
}

/// Endpoint I/O errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport {0} is closed")]
    Closed(String),
    #[error("failed to open {identity}: {source}")]
    Open {
        identity: String,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o error on {identity}: {source}")]
    Io {
        identity: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid line settings for {identity}: {message}")]
    InvalidSettings { identity: String, message: String },
    #[error("unsupported endpoint: {0}")]
    Unsupported(String),
}

/// A channel's error, wrapping the layer that failed
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("failed to open transport: {0}")]
    Open(#[source] TransportError),
    #[error("failed to get next record: {0}")]
    Produce(#[from] GeneratorError),
    #[error("failed to write to transport: {0}")]
    Write(#[source] TransportError),
    #[error("failed to flush transport: {0}")]
    Flush(#[source] TransportError),
    #[error("channel {0} already started")]
    AlreadyStarted(String),
    #[error("pacing stopped unexpectedly on {0}")]
    PacingStopped(String),
}

impl ChannelError {
    /// The transport-level cause, if this error came from the endpoint
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            Self::Open(e) | Self::Write(e) | Self::Flush(e) => Some(e),
            Self::Produce(_) | Self::AlreadyStarted(_) | Self::PacingStopped(_) => None,
        }
    }
}

/// Manager-level failures
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("no output channels started")]
    NoChannelsStarted,
    #[error("output manager already started")]
    AlreadyStarted,
}

/// A single configuration problem, addressed by its JSON path
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

/// Every problem found in one validation pass, displayed `; `-joined
#[derive(Debug, Clone, Default, PartialEq, Eq, thiserror::Error)]
#[error("{}", joined(.0))]
pub struct ValidationErrors(pub Vec<ValidationError>);

fn joined(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationErrors {
    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    /// True if any error is reported for exactly this field
    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("configuration validation failed: {0}")]
    Invalid(#[from] ValidationErrors),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_display() {
        let mut errors = ValidationErrors::default();
        assert_eq!(errors.to_string(), "");

        errors.push("ports", "at least one port must be configured");
        errors.push("timing.jitter_percent", "must be between 0 and 100");
        assert_eq!(
            errors.to_string(),
            "ports: at least one port must be configured; timing.jitter_percent: must be between 0 and 100"
        );

        let wrapped = ConfigError::from(errors);
        assert!(wrapped.to_string().starts_with("configuration validation failed: ports: "));
    }
}
