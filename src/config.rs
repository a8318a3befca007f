//! Probe system configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::condition::{Parser, DEFAULT_MAX_DEPTH};
use crate::error::ConfigError;

fn default_stream_capacity() -> usize {
    1024
}

fn default_max_expression_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_remove_disconnected_streams() -> bool {
    true
}

/// Tunables for a [`ProbeSystem`](crate::probe::ProbeSystem).
///
/// Every field has a default, so an empty TOML document is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSystemConfig {
    /// Per-stream buffer capacity for [`ProbeStream`](crate::probe::ProbeStream)s.
    #[serde(default = "default_stream_capacity")]
    pub stream_capacity: usize,
    /// Nesting limit for condition expressions.
    #[serde(default = "default_max_expression_depth")]
    pub max_expression_depth: usize,
    /// Remove a stream probe on its next match once its receiver is gone.
    #[serde(default = "default_remove_disconnected_streams")]
    pub remove_disconnected_streams: bool,
}

impl Default for ProbeSystemConfig {
    fn default() -> Self {
        Self {
            stream_capacity: default_stream_capacity(),
            max_expression_depth: default_max_expression_depth(),
            remove_disconnected_streams: default_remove_disconnected_streams(),
        }
    }
}

impl ProbeSystemConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject values the system cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "stream_capacity",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.max_expression_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "max_expression_depth",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Parser honoring this config's depth limit.
    #[must_use]
    pub const fn parser(&self) -> Parser {
        Parser::new(self.max_expression_depth)
    }
}
