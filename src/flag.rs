// src/flag.rs
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Flag seeded by the server under test.
pub const DEFAULT_FLAG_KEY: &str = "ENABLE_CHECKOUT_TIMER";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFlag {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl FeatureFlag {
    pub fn new(key: &str, enabled: bool) -> Self {
        Self {
            key: Some(key.to_string()),
            enabled,
            description: None,
            updated_at: None,
        }
    }
}

/// Body of `GET /feature-flags`.
#[derive(Debug, Clone, Deserialize)]
pub struct FlagList {
    pub flags: BTreeMap<String, FeatureFlag>,
}

impl FlagList {
    pub fn get(&self, key: &str) -> Option<&FeatureFlag> {
        self.flags.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.flags.contains_key(key)
    }
}

/// Single-flag reads come back either wrapped as `{"flag": {...}}` or bare.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FlagEnvelope {
    Wrapped { flag: FeatureFlag },
    Bare(FeatureFlag),
}

impl FlagEnvelope {
    pub fn into_flag(self) -> FeatureFlag {
        match self {
            FlagEnvelope::Wrapped { flag } => flag,
            FlagEnvelope::Bare(flag) => flag,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateRequest {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl UpdateRequest {
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled,
            description: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// Body of a 200 answer to an update.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateReply {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub flag: Option<FeatureFlag>,
}
