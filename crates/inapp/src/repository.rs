//! Live campaign list with per-user impression and opt-out state.

use campaign_core::reporting::{ErrorReporter, ErrorSource, ReportedError};
use campaign_core::types::{Campaign, CampaignData};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::CampaignCache;

struct RepositoryState {
    user_key: String,
    campaigns: Vec<Campaign>,
    last_sync_millis: Option<i64>,
}

pub struct CampaignRepository {
    state: RwLock<RepositoryState>,
    cache: Arc<dyn CampaignCache>,
    reporter: Arc<dyn ErrorReporter>,
}

impl std::fmt::Debug for CampaignRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("CampaignRepository")
            .field("user_key", &state.user_key)
            .field("campaigns", &state.campaigns.len())
            .finish()
    }
}

impl CampaignRepository {
    pub fn new(cache: Arc<dyn CampaignCache>, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            state: RwLock::new(RepositoryState {
                user_key: String::new(),
                campaigns: Vec::new(),
                last_sync_millis: None,
            }),
            cache,
            reporter,
        }
    }

    /// Switches to `user_key` and restores that user's cached campaigns.
    pub fn load_cached(&self, user_key: &str) {
        let campaigns = match self.cache.load(user_key) {
            Ok(campaigns) => campaigns,
            Err(e) => {
                warn!(error = %e, user_key = %user_key, "Failed to load campaign cache");
                self.reporter.report(ReportedError::new(
                    ErrorSource::Cache,
                    e.to_string(),
                    false,
                ));
                Vec::new()
            }
        };

        let mut state = self.state.write();
        info!(
            user_key = %user_key,
            campaigns = campaigns.len(),
            "Loaded cached campaigns"
        );
        state.user_key = user_key.to_string();
        state.campaigns = campaigns;
        state.last_sync_millis = None;
    }

    /// Replaces the campaign list with a freshly fetched one. Known campaigns
    /// keep their opt-out state, and impressions already used are subtracted
    /// from the (possibly changed) budget.
    pub fn sync_with(&self, list: Vec<CampaignData>, timestamp_millis: i64) {
        let mut state = self.state.write();
        let previous: HashMap<String, Campaign> = state
            .campaigns
            .drain(..)
            .map(|c| (c.id().to_string(), c))
            .collect();

        state.campaigns = list
            .into_iter()
            .map(|data| match previous.get(&data.campaign_id) {
                Some(old) => {
                    let used = old.max_impressions() - old.impressions_left();
                    let max = Campaign::new(data.clone()).max_impressions();
                    Campaign::with_state(data, (max - used).max(0), old.is_opted_out())
                }
                None => Campaign::new(data),
            })
            .collect();
        state.last_sync_millis = Some(timestamp_millis);

        debug!(
            campaigns = state.campaigns.len(),
            timestamp_millis,
            "Campaign list synced"
        );
        self.persist(&state);
    }

    pub fn list(&self) -> Vec<Campaign> {
        self.state.read().campaigns.clone()
    }

    pub fn get(&self, campaign_id: &str) -> Option<Campaign> {
        self.state
            .read()
            .campaigns
            .iter()
            .find(|c| c.id() == campaign_id)
            .cloned()
    }

    pub fn last_sync_millis(&self) -> Option<i64> {
        self.state.read().last_sync_millis
    }

    pub fn user_key(&self) -> String {
        self.state.read().user_key.clone()
    }

    /// Consumes one impression; returns the updated campaign.
    pub fn decrement_impressions(&self, campaign_id: &str) -> Option<Campaign> {
        self.update(campaign_id, Campaign::decrement_impressions)
    }

    pub fn opt_out(&self, campaign_id: &str) -> Option<Campaign> {
        self.update(campaign_id, Campaign::opt_out)
    }

    fn update(&self, campaign_id: &str, apply: impl FnOnce(&mut Campaign)) -> Option<Campaign> {
        let mut state = self.state.write();
        let campaign = state.campaigns.iter_mut().find(|c| c.id() == campaign_id)?;
        apply(campaign);
        let updated = campaign.clone();
        self.persist(&state);
        Some(updated)
    }

    fn persist(&self, state: &RepositoryState) {
        if let Err(e) = self.cache.save(&state.user_key, &state.campaigns) {
            warn!(error = %e, "Failed to persist campaign cache");
            self.reporter.report(ReportedError::new(
                ErrorSource::Cache,
                e.to_string(),
                false,
            ));
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use campaign_core::reporting::noop_reporter;
    use campaign_core::types::{CampaignType, MessagePayload};

    pub(crate) fn campaign_data(id: &str, max_impressions: i32) -> CampaignData {
        CampaignData {
            campaign_id: id.to_string(),
            campaign_type: CampaignType::Modal,
            max_impressions,
            infinite_impressions: false,
            has_no_end_date: true,
            is_test: false,
            triggers: None,
            message_payload: MessagePayload {
                title: format!("Campaign {id}"),
                ..Default::default()
            },
            tooltip: None,
        }
    }

    fn repository() -> (CampaignRepository, Arc<InMemoryCache>) {
        let cache = Arc::new(InMemoryCache::new());
        (CampaignRepository::new(cache.clone(), noop_reporter()), cache)
    }

    #[test]
    fn test_sync_replaces_list() {
        let (repo, _) = repository();
        repo.sync_with(vec![campaign_data("a", 2), campaign_data("b", 2)], 100);
        repo.sync_with(vec![campaign_data("b", 2), campaign_data("c", 1)], 200);

        let ids: Vec<String> = repo.list().iter().map(|c| c.id().to_string()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(repo.last_sync_millis(), Some(200));
    }

    #[test]
    fn test_sync_carries_over_state() {
        let (repo, _) = repository();
        repo.sync_with(vec![campaign_data("a", 3)], 1);
        repo.decrement_impressions("a");
        repo.opt_out("a");

        // Budget raised from 3 to 5 with one impression used.
        repo.sync_with(vec![campaign_data("a", 5)], 2);
        let campaign = repo.get("a").unwrap();
        assert_eq!(campaign.impressions_left(), 4);
        assert!(campaign.is_opted_out());

        // Budget lowered below what was used.
        repo.sync_with(vec![campaign_data("a", 1)], 3);
        assert_eq!(repo.get("a").unwrap().impressions_left(), 0);
    }

    #[test]
    fn test_mutations_are_written_through() {
        let (repo, cache) = repository();
        repo.load_cached("alice");
        repo.sync_with(vec![campaign_data("a", 2)], 1);
        repo.decrement_impressions("a");

        let cached = cache.load("alice").unwrap();
        assert_eq!(cached[0].impressions_left(), 1);

        repo.load_cached("bob");
        assert!(repo.list().is_empty());
        repo.load_cached("alice");
        assert_eq!(repo.get("a").unwrap().impressions_left(), 1);
    }

    #[test]
    fn test_unknown_campaign_updates_are_ignored() {
        let (repo, _) = repository();
        assert!(repo.decrement_impressions("missing").is_none());
        assert!(repo.opt_out("missing").is_none());
    }
}
