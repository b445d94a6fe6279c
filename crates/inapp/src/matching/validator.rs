use campaign_core::types::{Campaign, Event};
use std::sync::Arc;
use tracing::trace;

use super::attributes::TriggerAttributesValidator;
use super::event_matcher::EventMatcher;

/// Cross-references campaigns with the matcher and reports the ones whose
/// full trigger set is satisfied.
#[derive(Debug)]
pub struct CampaignsValidator {
    matcher: Arc<EventMatcher>,
    attributes: TriggerAttributesValidator,
}

impl CampaignsValidator {
    pub fn new(matcher: Arc<EventMatcher>) -> Self {
        Self {
            matcher,
            attributes: TriggerAttributesValidator::new(),
        }
    }

    /// Calls `handler` with every campaign that is ready to show, together
    /// with the exact events that satisfied its triggers. Test campaigns are
    /// always ready and come with an empty event set.
    pub fn validate(&self, campaigns: &[Campaign], mut handler: impl FnMut(&Campaign, Vec<Event>)) {
        for campaign in campaigns {
            if !campaign.has_impressions_left() {
                continue;
            }
            if campaign.is_test() {
                handler(campaign, Vec::new());
                continue;
            }
            if campaign.is_opted_out() || campaign.is_outdated() {
                trace!(campaign_id = %campaign.id(), "Skipping opted-out or outdated campaign");
                continue;
            }
            if campaign.triggers().map_or(true, |t| t.is_empty()) {
                continue;
            }
            if !self.matcher.contains_all_matched_events(campaign) {
                continue;
            }
            if let Some(events) = self.resolve_trigger_events(campaign) {
                handler(campaign, events);
            }
        }
    }

    /// Picks one distinct candidate event per trigger; `None` as soon as a
    /// trigger cannot be satisfied.
    fn resolve_trigger_events(&self, campaign: &Campaign) -> Option<Vec<Event>> {
        let triggers = campaign.triggers()?;
        let mut candidates = self.matcher.matched_events(campaign);
        let mut satisfying = Vec::with_capacity(triggers.len());

        for trigger in triggers {
            let name = trigger.matching_event_name();
            let position = candidates.iter().position(|event| {
                event.matching_name() == name && self.attributes.is_trigger_satisfied(trigger, event)
            })?;
            satisfying.push(candidates.remove(position));
        }
        Some(satisfying)
    }
}
