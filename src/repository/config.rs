use std::env;

use tracing::warn;

use crate::core::DocumentSubtype;

pub const ENV_DEFAULT_SUBTYPE: &str = "DOCDELTA_DEFAULT_SUBTYPE";
pub const ENV_STRICT_SERIALIZATION: &str = "DOCDELTA_STRICT_SERIALIZATION";

/// Repository behaviour knobs
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Subtype assumed for a document column whose real type cannot be determined
    pub default_subtype: DocumentSubtype,

    /// Abort an update when a changed value cannot be serialized, instead of
    /// skipping that path
    pub strict_serialization: bool,

    /// Capture a baseline for entities created inside a transaction
    pub capture_on_create: bool,

    /// Capture baselines for every entity returned by list reads inside a transaction
    pub capture_on_list: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            default_subtype: DocumentSubtype::Jsonb,
            strict_serialization: false,
            capture_on_create: true,
            capture_on_list: true,
        }
    }
}

impl RepositoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `DOCDELTA_DEFAULT_SUBTYPE` and
    /// `DOCDELTA_STRICT_SERIALIZATION`. Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = env::var(ENV_DEFAULT_SUBTYPE) {
            match raw.parse::<DocumentSubtype>() {
                Ok(subtype) => config.default_subtype = subtype,
                Err(err) => warn!("Ignoring {}: {}", ENV_DEFAULT_SUBTYPE, err),
            }
        }

        if let Ok(raw) = env::var(ENV_STRICT_SERIALIZATION) {
            match parse_flag(&raw) {
                Some(flag) => config.strict_serialization = flag,
                None => warn!("Ignoring {}: '{}' is not a boolean", ENV_STRICT_SERIALIZATION, raw),
            }
        }

        config
    }

    pub fn default_subtype(mut self, subtype: DocumentSubtype) -> Self {
        self.default_subtype = subtype;
        self
    }

    pub fn strict_serialization(mut self, strict: bool) -> Self {
        self.strict_serialization = strict;
        self
    }

    pub fn capture_on_create(mut self, capture: bool) -> Self {
        self.capture_on_create = capture;
        self
    }

    pub fn capture_on_list(mut self, capture: bool) -> Self {
        self.capture_on_list = capture;
        self
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
