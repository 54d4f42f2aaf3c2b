//! Strategy configuration file loading.
//!
//! The format is line-oriented UTF-8: blank lines and `#` comments are
//! ignored, every other line is `key = value` or `key: value`. Whitespace
//! and surrounding double quotes are trimmed from both sides.
//!
//! A [`Config`] is an explicit value constructed at startup and threaded
//! through strategy constructors; there is no process-global configuration.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// Key/value configuration loaded from a strategies file.
#[derive(Debug, Clone, Default)]
pub struct Config {
    values: HashMap<String, String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration file, skipping malformed lines with a warning.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::parse(&contents))
    }

    /// Parse configuration text. Never fails; unparseable lines are skipped.
    pub fn parse(contents: &str) -> Self {
        let mut values = HashMap::new();
        for (lineno, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            // Separator is '=' or ':', whichever comes first.
            let sep = line
                .char_indices()
                .find(|(_, c)| *c == '=' || *c == ':')
                .map(|(i, _)| i);
            let Some(sep) = sep else {
                warn!(line = lineno + 1, "skipping config line without separator");
                continue;
            };
            let key = trim_field(&line[..sep]);
            let value = trim_field(&line[sep + 1..]);
            if key.is_empty() {
                warn!(line = lineno + 1, "skipping config line with empty key");
                continue;
            }
            values.insert(key.to_string(), value.to_string());
        }
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    /// Typed lookup with a default. Unparseable values fall back to the
    /// default with a warning rather than failing the run.
    pub fn get_or<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.values.get(key) {
            None => default,
            Some(raw) => match raw.parse() {
                Ok(v) => v,
                Err(_) => {
                    warn!(key, value = %raw, "unparseable config value, using default");
                    default
                }
            },
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Trim whitespace and one layer of surrounding double quotes.
fn trim_field(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}
