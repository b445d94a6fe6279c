use campaign_core::types::{Campaign, Event};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::dispatch::{CampaignDispatcher, TooltipDispatcher};
use crate::matching::{CampaignsValidator, EventMatcher};
use crate::polling::SyncListener;
use crate::repository::CampaignRepository;

/// Turns validated campaigns into display requests, claiming the events that
/// triggered them so they cannot fire the same campaign twice.
pub struct CampaignTriggerAgent {
    repository: Arc<CampaignRepository>,
    matcher: Arc<EventMatcher>,
    validator: CampaignsValidator,
    dispatcher: CampaignDispatcher,
    tooltips: TooltipDispatcher,
    validation: Mutex<()>,
}

impl CampaignTriggerAgent {
    pub fn new(
        repository: Arc<CampaignRepository>,
        matcher: Arc<EventMatcher>,
        dispatcher: CampaignDispatcher,
        tooltips: TooltipDispatcher,
    ) -> Self {
        Self {
            validator: CampaignsValidator::new(matcher.clone()),
            repository,
            matcher,
            dispatcher,
            tooltips,
            validation: Mutex::new(()),
        }
    }

    /// Validates every campaign and queues the ones whose events could be
    /// claimed. Campaigns that lose the claim to a concurrent pass stay
    /// eligible for later passes.
    pub fn validate_and_trigger_campaigns(&self) {
        {
            let _validation = self.validation.lock();
            let campaigns = self.repository.list();
            let mut ready: Vec<(Campaign, Vec<Event>)> = Vec::new();
            self.validator.validate(&campaigns, |campaign, events| {
                ready.push((campaign.clone(), events));
            });

            for (campaign, events) in ready {
                // Test campaigns validate on every pass; one queued entry is enough.
                if campaign.is_test() && self.dispatcher.is_queued(campaign.id()) {
                    continue;
                }
                if let Err(e) = self.matcher.remove_set_of_matched_events(&events, &campaign) {
                    debug!(campaign_id = %campaign.id(), reason = %e, "Trigger claim dropped");
                    continue;
                }
                metrics::counter!("inapp.campaigns.triggered").increment(1);
                if campaign.is_tooltip() {
                    self.tooltips.set_needs_display(campaign);
                } else {
                    self.dispatcher.add_to_queue(campaign.id());
                }
            }
        }
        self.dispatcher.dispatch_all_if_needed();
    }
}

impl SyncListener for CampaignTriggerAgent {
    fn campaigns_synced(&self) {
        let live: HashSet<String> = self
            .repository
            .list()
            .iter()
            .map(|c| c.id().to_string())
            .collect();
        self.matcher.retain_campaigns(&live);
        self.validate_and_trigger_campaigns();
    }
}
