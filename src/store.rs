use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::flag::FeatureFlag;

pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Key/value view of feature flags, independent of any HTTP server.
#[async_trait]
pub trait FlagStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<FeatureFlag>, StoreError>;
    async fn set(&self, key: &str, enabled: bool) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<Option<FeatureFlag>, StoreError>;
    async fn all(&self) -> Result<Vec<FeatureFlag>, StoreError>;

    /// Unknown keys and store failures both read as disabled.
    async fn is_enabled(&self, key: &str) -> bool {
        match self.get(key).await {
            Ok(Some(flag)) => flag.enabled,
            _ => false,
        }
    }
}

pub struct MemoryStore {
    flags: RwLock<BTreeMap<String, FeatureFlag>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            flags: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn seeded<'a>(flags: impl IntoIterator<Item = (&'a str, bool)>) -> Self {
        let flags = flags
            .into_iter()
            .map(|(key, enabled)| (key.to_string(), FeatureFlag::new(key, enabled)))
            .collect();
        Self {
            flags: RwLock::new(flags),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FlagStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<FeatureFlag>, StoreError> {
        let flags = self.flags.read().await;
        Ok(flags.get(key).cloned())
    }

    async fn set(&self, key: &str, enabled: bool) -> Result<(), StoreError> {
        let mut flags = self.flags.write().await;
        let flag = flags
            .entry(key.to_string())
            .or_insert_with(|| FeatureFlag::new(key, enabled));
        flag.enabled = enabled;
        flag.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<Option<FeatureFlag>, StoreError> {
        let mut flags = self.flags.write().await;
        Ok(flags.remove(key))
    }

    async fn all(&self) -> Result<Vec<FeatureFlag>, StoreError> {
        let flags = self.flags.read().await;
        Ok(flags.values().cloned().collect())
    }
}
