//! Campaign state cache: keeps impressions and opt-out state per user so a
//! new session resumes where the previous one stopped.

use campaign_core::types::Campaign;
use campaign_core::{CampaignError, CampaignResult};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

pub trait CampaignCache: Send + Sync {
    fn load(&self, user_key: &str) -> CampaignResult<Vec<Campaign>>;
    fn save(&self, user_key: &str, campaigns: &[Campaign]) -> CampaignResult<()>;
}

/// Process-local cache, lost when the process exits.
#[derive(Default)]
pub struct InMemoryCache {
    entries: DashMap<String, Vec<Campaign>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CampaignCache for InMemoryCache {
    fn load(&self, user_key: &str) -> CampaignResult<Vec<Campaign>> {
        Ok(self
            .entries
            .get(user_key)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    fn save(&self, user_key: &str, campaigns: &[Campaign]) -> CampaignResult<()> {
        self.entries.insert(user_key.to_string(), campaigns.to_vec());
        Ok(())
    }
}

/// Single JSON document mapping user keys to their campaign lists.
pub struct JsonFileCache {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> CampaignResult<HashMap<String, Vec<Campaign>>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let raw = fs::read(&self.path)?;
        if raw.is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_slice(&raw).map_err(|e| {
            CampaignError::Cache(format!("corrupt cache file {}: {e}", self.path.display()))
        })
    }
}

impl CampaignCache for JsonFileCache {
    fn load(&self, user_key: &str) -> CampaignResult<Vec<Campaign>> {
        let _guard = self.write_lock.lock();
        let mut all = self.read_all()?;
        Ok(all.remove(user_key).unwrap_or_default())
    }

    fn save(&self, user_key: &str, campaigns: &[Campaign]) -> CampaignResult<()> {
        let _guard = self.write_lock.lock();
        // A corrupt file is replaced rather than blocking every later write.
        let mut all = self.read_all().unwrap_or_default();
        all.insert(user_key.to_string(), campaigns.to_vec());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, serde_json::to_vec(&all)?)?;
        fs::rename(&tmp_path, &self.path)?;

        debug!(
            path = %self.path.display(),
            user_key = %user_key,
            campaigns = campaigns.len(),
            "Campaign cache written"
        );
        Ok(())
    }
}
