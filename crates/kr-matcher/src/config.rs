use std::path::{Path, PathBuf};

use kr_core::time::{DEFAULT_DAYS_AFTER, DEFAULT_DAYS_BEFORE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MINIMUM_CONFIDENCE: f64 = 15.0;
pub const AUTO_LINK_CONFIDENCE: f64 = 80.0;
pub const HIGH_CONFIDENCE: f64 = 90.0;
pub const MEDIUM_CONFIDENCE: f64 = 60.0;
pub const DEFAULT_MAX_CANDIDATES: usize = 100;

/// Thresholds carried on every score result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thresholds {
    pub minimum: f64,
    pub auto_link: f64,
    pub high: f64,
    pub medium: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            minimum: MINIMUM_CONFIDENCE,
            auto_link: AUTO_LINK_CONFIDENCE,
            high: HIGH_CONFIDENCE,
            medium: MEDIUM_CONFIDENCE,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading matcher config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing matcher config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid value for {var}: {value}")]
    BadVar { var: String, value: String },
    #[error("invalid matcher config: {0}")]
    Invalid(String),
}

/// Matcher tuning. The YAML file uses these snake_case field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub minimum_confidence: f64,
    pub auto_link_threshold: f64,
    pub high_confidence: f64,
    pub medium_confidence: f64,
    pub max_candidates: usize,
    pub window_days_before: i64,
    pub window_days_after: i64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            minimum_confidence: MINIMUM_CONFIDENCE,
            auto_link_threshold: AUTO_LINK_CONFIDENCE,
            high_confidence: HIGH_CONFIDENCE,
            medium_confidence: MEDIUM_CONFIDENCE,
            max_candidates: DEFAULT_MAX_CANDIDATES,
            window_days_before: DEFAULT_DAYS_BEFORE,
            window_days_after: DEFAULT_DAYS_AFTER,
        }
    }
}

impl MatcherConfig {
    pub const FILE_VAR: &'static str = "KR_MATCHER_CONFIG";

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Optional YAML file named by `KR_MATCHER_CONFIG`, then `KR_*` overrides.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup(Self::FILE_VAR).filter(|p| !p.trim().is_empty()) {
            Some(path) => Self::from_yaml_file(Path::new(&path))?,
            None => Self::default(),
        };

        if let Some(v) = parse_var(&lookup, "KR_AUTO_LINK_THRESHOLD")? {
            config.auto_link_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "KR_MINIMUM_CONFIDENCE")? {
            config.minimum_confidence = v;
        }
        if let Some(v) = parse_var(&lookup, "KR_MAX_CANDIDATES")? {
            config.max_candidates = v;
        }
        if let Some(v) = parse_var(&lookup, "KR_WINDOW_DAYS_BEFORE")? {
            config.window_days_before = v;
        }
        if let Some(v) = parse_var(&lookup, "KR_WINDOW_DAYS_AFTER")? {
            config.window_days_after = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let in_range = |v: f64| (0.0..=100.0).contains(&v);
        if !in_range(self.minimum_confidence) || !in_range(self.auto_link_threshold) {
            return Err(ConfigError::Invalid(
                "confidence thresholds must be within 0..=100".into(),
            ));
        }
        if self.minimum_confidence > self.auto_link_threshold {
            return Err(ConfigError::Invalid(
                "minimum_confidence exceeds auto_link_threshold".into(),
            ));
        }
        if self.window_days_before < 0 || self.window_days_after < 0 {
            return Err(ConfigError::Invalid("window days must be non-negative".into()));
        }
        if self.max_candidates == 0 {
            return Err(ConfigError::Invalid("max_candidates must be positive".into()));
        }
        Ok(())
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            minimum: self.minimum_confidence,
            auto_link: self.auto_link_threshold,
            high: self.high_confidence,
            medium: self.medium_confidence,
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::BadVar {
                var: var.to_string(),
                value: raw,
            }),
        None => Ok(None),
    }
}
