use campaign_core::types::{Campaign, Event};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::repository::CampaignRepository;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimError {
    #[error("one or more events of the set are no longer available")]
    NotFound,
    #[error("the persistent events of this set have already triggered the campaign")]
    AlreadyUsed,
}

#[derive(Default)]
struct MatcherState {
    /// campaign id -> candidate events, one entry per matching log call.
    matched: HashMap<String, Vec<Event>>,
    /// Persistent events by matching name, shared by every campaign.
    persistent: HashMap<String, Event>,
    /// Campaigns already fired from persistent events alone.
    persistent_only_triggered: HashSet<String>,
}

/// Stores logged events and correlates them with campaign triggers.
///
/// The maps are shared between the event logging path and the validation
/// path, so every operation takes the internal lock and no raw map access
/// is exposed.
pub struct EventMatcher {
    repository: Arc<CampaignRepository>,
    state: Mutex<MatcherState>,
}

impl std::fmt::Debug for EventMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EventMatcher")
            .field("campaigns_with_matches", &state.matched.len())
            .field("persistent_events", &state.persistent.len())
            .finish()
    }
}

impl EventMatcher {
    pub fn new(repository: Arc<CampaignRepository>) -> Self {
        Self {
            repository,
            state: Mutex::new(MatcherState::default()),
        }
    }

    /// Records `event`. Persistent events go to the shared set; any other
    /// event is appended to the candidate list of every campaign with a
    /// trigger of the same name. Attributes are not checked here.
    pub fn match_and_store(&self, event: Event) {
        let name = event.matching_name();
        let mut state = self.state.lock();

        if event.is_persistent() {
            state.persistent.entry(name).or_insert(event);
            return;
        }

        for campaign in self.repository.list() {
            let Some(triggers) = campaign.triggers() else {
                continue;
            };
            if triggers.iter().any(|t| t.matching_event_name() == name) {
                debug!(campaign_id = %campaign.id(), event = %name, "Event matched campaign trigger");
                state
                    .matched
                    .entry(campaign.id().to_string())
                    .or_default()
                    .push(event.clone());
            }
        }
    }

    /// Candidate events for `campaign`, persistent events included.
    pub fn matched_events(&self, campaign: &Campaign) -> Vec<Event> {
        let state = self.state.lock();
        let mut events = state
            .matched
            .get(campaign.id())
            .cloned()
            .unwrap_or_default();
        events.extend(state.persistent.values().cloned());
        events
    }

    /// Cheap pre-check: every trigger has at least one candidate event with
    /// its name. Campaigns without triggers never pass.
    pub fn contains_all_matched_events(&self, campaign: &Campaign) -> bool {
        let Some(triggers) = campaign.triggers() else {
            return false;
        };
        if triggers.is_empty() {
            return false;
        }

        let state = self.state.lock();
        let candidates = state.matched.get(campaign.id());
        triggers.iter().all(|trigger| {
            let name = trigger.matching_event_name();
            state.persistent.contains_key(&name)
                || candidates
                    .map(|events| events.iter().any(|e| e.matching_name() == name))
                    .unwrap_or(false)
        })
    }

    /// Atomically claims `events` for `campaign`: every non-persistent event
    /// removes exactly one equal candidate, or nothing is removed at all.
    ///
    /// A non-empty set made only of persistent events can claim a campaign
    /// once; later attempts fail with [`ClaimError::AlreadyUsed`]. An empty
    /// set (test campaigns) always succeeds and consumes nothing.
    pub fn remove_set_of_matched_events(
        &self,
        events: &[Event],
        campaign: &Campaign,
    ) -> Result<(), ClaimError> {
        let mut state = self.state.lock();
        let mut remaining = state
            .matched
            .get(campaign.id())
            .cloned()
            .unwrap_or_default();

        let mut fresh_events = 0usize;
        for event in events {
            if event.is_persistent() {
                if !state.persistent.contains_key(&event.matching_name()) {
                    return Err(ClaimError::NotFound);
                }
                continue;
            }
            let position = remaining
                .iter()
                .position(|candidate| candidate == event)
                .ok_or(ClaimError::NotFound)?;
            remaining.remove(position);
            fresh_events += 1;
        }

        if !events.is_empty() && fresh_events == 0 {
            if state.persistent_only_triggered.contains(campaign.id()) {
                return Err(ClaimError::AlreadyUsed);
            }
            state
                .persistent_only_triggered
                .insert(campaign.id().to_string());
        }

        if remaining.is_empty() {
            state.matched.remove(campaign.id());
        } else {
            state.matched.insert(campaign.id().to_string(), remaining);
        }
        Ok(())
    }

    /// Forgets candidates and persistent-only firings of campaigns that are
    /// no longer in the live list.
    pub fn retain_campaigns(&self, live_ids: &HashSet<String>) {
        let mut state = self.state.lock();
        let before = state.matched.len();
        state.matched.retain(|id, _| live_ids.contains(id));
        state
            .persistent_only_triggered
            .retain(|id| live_ids.contains(id));
        let pruned = before - state.matched.len();
        if pruned > 0 {
            debug!(pruned, "Pruned matched events of removed campaigns");
        }
    }

    /// Drops every per-campaign candidate list, keeping persistent events.
    pub fn clear_non_persistent_events(&self) {
        let mut state = self.state.lock();
        state.matched.clear();
        debug!("Cleared non-persistent matched events");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::repository::tests::campaign_data;
    use campaign_core::reporting::noop_reporter;
    use campaign_core::types::{EventType, Trigger};

    fn setup(triggers: Vec<Trigger>) -> (EventMatcher, Campaign) {
        let repository = Arc::new(CampaignRepository::new(
            Arc::new(InMemoryCache::new()),
            noop_reporter(),
        ));
        let mut data = campaign_data("c1", 5);
        data.triggers = Some(triggers);
        repository.sync_with(vec![data], 0);
        let campaign = repository.get("c1").unwrap();
        (EventMatcher::new(repository), campaign)
    }

    #[test]
    fn test_events_stored_per_matching_campaign() {
        let (matcher, campaign) = setup(vec![Trigger::new(EventType::Custom, "Cart")]);
        matcher.match_and_store(Event::custom("cart"));
        matcher.match_and_store(Event::custom("other"));
        matcher.match_and_store(Event::custom("CART"));

        assert_eq!(matcher.matched_events(&campaign).len(), 2);
        assert!(matcher.contains_all_matched_events(&campaign));
    }

    #[test]
    fn test_precheck_needs_every_trigger() {
        let (matcher, campaign) = setup(vec![
            Trigger::new(EventType::LoginSuccessful, ""),
            Trigger::new(EventType::AppStart, ""),
        ]);
        matcher.match_and_store(Event::login_successful());
        assert!(!matcher.contains_all_matched_events(&campaign));
        matcher.match_and_store(Event::app_start());
        assert!(matcher.contains_all_matched_events(&campaign));
    }

    #[test]
    fn test_claim_is_all_or_nothing() {
        let (matcher, campaign) = setup(vec![Trigger::new(EventType::Custom, "cart")]);
        let logged = Event::custom("cart");
        matcher.match_and_store(logged.clone());

        let never_logged = Event::custom("cart").with_timestamp(chrono::Utc::now() + chrono::Duration::days(1));
        assert_eq!(
            matcher.remove_set_of_matched_events(&[logged.clone(), never_logged], &campaign),
            Err(ClaimError::NotFound)
        );
        assert_eq!(matcher.matched_events(&campaign), vec![logged.clone()]);

        assert_eq!(matcher.remove_set_of_matched_events(&[logged.clone()], &campaign), Ok(()));
        assert!(matcher.matched_events(&campaign).is_empty());
        assert_eq!(
            matcher.remove_set_of_matched_events(&[logged], &campaign),
            Err(ClaimError::NotFound)
        );
    }

    #[test]
    fn test_claim_consumes_one_copy_per_event() {
        let (matcher, campaign) = setup(vec![Trigger::new(EventType::Custom, "cart")]);
        let event = Event::custom("cart");
        matcher.match_and_store(event.clone());
        matcher.match_and_store(event.clone());

        matcher
            .remove_set_of_matched_events(&[event.clone()], &campaign)
            .unwrap();
        assert_eq!(matcher.matched_events(&campaign).len(), 1);
    }

    #[test]
    fn test_persistent_only_claim_fires_once() {
        let (matcher, campaign) = setup(vec![Trigger::new(EventType::AppStart, "")]);
        let app_start = Event::app_start();
        matcher.match_and_store(app_start.clone());

        assert_eq!(
            matcher.remove_set_of_matched_events(&[app_start.clone()], &campaign),
            Ok(())
        );
        assert_eq!(
            matcher.remove_set_of_matched_events(&[app_start.clone()], &campaign),
            Err(ClaimError::AlreadyUsed)
        );
        // The persistent event itself is never consumed.
        assert_eq!(matcher.matched_events(&campaign), vec![app_start]);
    }

    #[test]
    fn test_empty_claim_is_never_recorded() {
        let (matcher, campaign) = setup(vec![Trigger::new(EventType::AppStart, "")]);
        assert_eq!(matcher.remove_set_of_matched_events(&[], &campaign), Ok(()));
        assert_eq!(matcher.remove_set_of_matched_events(&[], &campaign), Ok(()));

        // A later persistent-only claim still gets its single firing.
        let app_start = Event::app_start();
        matcher.match_and_store(app_start.clone());
        assert_eq!(
            matcher.remove_set_of_matched_events(&[app_start], &campaign),
            Ok(())
        );
    }

    #[test]
    fn test_retain_prunes_removed_campaigns() {
        let (matcher, campaign) = setup(vec![Trigger::new(EventType::Custom, "cart")]);
        matcher.match_and_store(Event::custom("cart"));

        matcher.retain_campaigns(&HashSet::from(["c1".to_string()]));
        assert_eq!(matcher.matched_events(&campaign).len(), 1);

        matcher.retain_campaigns(&HashSet::new());
        assert!(matcher.matched_events(&campaign).is_empty());
        assert!(format!("{matcher:?}").contains("campaigns_with_matches: 0"));
    }

    #[test]
    fn test_clear_keeps_persistent_events() {
        let (matcher, campaign) = setup(vec![
            Trigger::new(EventType::AppStart, ""),
            Trigger::new(EventType::Custom, "cart"),
        ]);
        matcher.match_and_store(Event::app_start());
        matcher.match_and_store(Event::custom("cart"));
        matcher.clear_non_persistent_events();

        let remaining = matcher.matched_events(&campaign);
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].is_persistent());
    }
}
