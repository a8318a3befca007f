//! Error types for evprobe.
//!
//! Errors are strongly typed using thiserror. Parse failures are fatal to the
//! registration call that triggered them; lookup failures only affect the
//! single call that named an unknown handle.

use std::path::PathBuf;

use thiserror::Error;

use crate::event::ProbeHandle;

/// Errors raised while turning an expression into a condition tree.
///
/// Construction is all-or-nothing: when any sub-expression fails, the whole
/// parse fails and every node built so far is dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The expression is not an array whose first element is a string tag.
    #[error("invalid condition")]
    InvalidCondition,

    /// The tag does not name a known condition.
    #[error("invalid condition type: \"{tag}\"")]
    UnknownTag {
        tag: String,
    },

    /// Wrong number of arguments after the tag.
    #[error("\"{tag}\" requires {expected}")]
    Arity {
        tag: String,
        expected: &'static str,
    },

    /// An argument has the wrong type.
    #[error("\"{tag}\" {reason}")]
    ArgumentType {
        tag: String,
        reason: &'static str,
    },

    /// Nesting exceeds the configured limit.
    #[error("condition nesting exceeds maximum depth of {max_depth}")]
    TooDeep {
        max_depth: usize,
    },
}

impl ParseError {
    /// The tag the diagnostic refers to, if the failure got far enough to read one.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        match self {
            Self::UnknownTag { tag } | Self::Arity { tag, .. } | Self::ArgumentType { tag, .. } => {
                Some(tag)
            }
            Self::InvalidCondition | Self::TooDeep { .. } => None,
        }
    }

    pub(crate) fn arity(tag: &str, expected: &'static str) -> Self {
        Self::Arity {
            tag: tag.to_string(),
            expected,
        }
    }

    pub(crate) fn argument(tag: &str, reason: &'static str) -> Self {
        Self::ArgumentType {
            tag: tag.to_string(),
            reason,
        }
    }
}

/// Errors raised by registry lookups.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Probe not found: {0}")]
    ProbeNotFound(ProbeHandle),
}

/// Errors raised when pulling from a probe stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("probe stream {0} is disconnected")]
    Disconnected(ProbeHandle),

    #[error("probe stream receive timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid config field '{field}': {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

/// Top-level error type for evprobe.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid expression: {0}")]
    Parse(#[from] ParseError),

    #[error("lookup failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("stream error: {0}")]
    Stream(#[from] StreamError),
}

impl ProbeError {
    /// Returns true if this is a parse-time error.
    #[must_use]
    pub const fn is_parse(&self) -> bool {
        matches!(self, Self::Parse(_))
    }

    /// Returns true if this is a handle lookup failure.
    #[must_use]
    pub const fn is_lookup(&self) -> bool {
        matches!(self, Self::Registry(_))
    }

    /// Returns true if this is a stream error.
    #[must_use]
    pub const fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// Result type alias for evprobe operations.
pub type ProbeResult<T> = Result<T, ProbeError>;
