//! Tooltip display, anchored to visible host views.
//!
//! Tooltips are not ordered: each one waits for its own target view and
//! several may be presented at once, one per view.

use campaign_core::types::{Campaign, Impression, ImpressionType};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{
    fetch_images, flush_impressions, DisplayCollaborators, DisplayConfirmation, TooltipPresentation,
    TooltipRequest, TooltipRouter,
};
use crate::repository::CampaignRepository;
use crate::scheduler::{ScheduledWork, WorkScheduler};

#[derive(Default)]
struct TooltipState {
    /// Tooltips waiting to be shown, by campaign id.
    active: HashMap<String, Campaign>,
    in_flight: HashSet<String>,
    displayed: HashSet<String>,
    visible_views: HashSet<String>,
    auto_dismiss: HashMap<String, ScheduledWork>,
    /// Bumped by `reset`; presentations started before it are abandoned.
    generation: u64,
}

struct Inner {
    repository: Arc<CampaignRepository>,
    router: Arc<dyn TooltipRouter>,
    collaborators: DisplayCollaborators,
    scheduler: WorkScheduler,
    state: Mutex<TooltipState>,
}

#[derive(Clone)]
pub struct TooltipDispatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TooltipDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TooltipDispatcher")
            .field("active", &state.active.len())
            .field("displayed", &state.displayed.len())
            .finish()
    }
}

fn target_view<'a>(views: &'a HashSet<String>, campaign: &Campaign) -> Option<&'a String> {
    let element = campaign.tooltip()?.ui_element_id.as_str();
    if element.is_empty() {
        return None;
    }
    views.iter().find(|view| view.contains(element))
}

impl TooltipDispatcher {
    pub fn new(
        repository: Arc<CampaignRepository>,
        router: Arc<dyn TooltipRouter>,
        collaborators: DisplayCollaborators,
        scheduler: WorkScheduler,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                repository,
                router,
                collaborators,
                scheduler,
                state: Mutex::new(TooltipState::default()),
            }),
        }
    }

    /// Marks a validated tooltip campaign for display and shows it as soon
    /// as its target view is visible.
    pub fn set_needs_display(&self, campaign: Campaign) {
        let id = campaign.id().to_string();
        {
            let mut state = self.inner.state.lock();
            if state.displayed.contains(&id) {
                return;
            }
            state.active.entry(id.clone()).or_insert(campaign);
        }
        Inner::try_display(&self.inner, &id);
    }

    pub fn view_did_appear(&self, view_identifier: impl Into<String>) {
        let view_identifier = view_identifier.into();
        let pending: Vec<String> = {
            let mut state = self.inner.state.lock();
            state.visible_views.insert(view_identifier.clone());
            state
                .active
                .iter()
                .filter(|(_, campaign)| {
                    campaign.tooltip().map_or(false, |t| {
                        !t.ui_element_id.is_empty() && view_identifier.contains(&t.ui_element_id)
                    })
                })
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in pending {
            Inner::try_display(&self.inner, &id);
        }
    }

    pub fn view_did_disappear(&self, view_identifier: &str) {
        self.inner.state.lock().visible_views.remove(view_identifier);
    }

    /// Closes a displayed tooltip: dismisses it and records the exit.
    pub fn close_tooltip(&self, campaign_id: &str) {
        self.inner.close(campaign_id);
    }

    /// Forgets tooltips that were not shown yet, including those already
    /// on their way to the router.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        state.active.clear();
        state.in_flight.clear();
        state.generation += 1;
    }

    pub fn is_displayed(&self, campaign_id: &str) -> bool {
        self.inner.state.lock().displayed.contains(campaign_id)
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.inner.state.lock().active.keys().cloned().collect()
    }
}

impl Inner {
    fn try_display(inner: &Arc<Inner>, campaign_id: &str) {
        let (view, generation) = {
            let mut state = inner.state.lock();
            if state.in_flight.contains(campaign_id) || state.displayed.contains(campaign_id) {
                return;
            }
            let Some(campaign) = state.active.get(campaign_id) else {
                return;
            };
            let Some(view) = target_view(&state.visible_views, campaign).cloned() else {
                debug!(campaign_id = %campaign_id, "Tooltip target view not visible yet");
                return;
            };
            state.in_flight.insert(campaign_id.to_string());
            (view, state.generation)
        };

        let inner = inner.clone();
        let campaign_id = campaign_id.to_string();
        tokio::spawn(async move {
            inner.present(campaign_id, view, generation).await;
        });
    }

    async fn present(
        self: Arc<Self>,
        campaign_id: String,
        view_identifier: String,
        generation: u64,
    ) {
        let Some(campaign) = self.repository.get(&campaign_id) else {
            self.forget(&campaign_id);
            return;
        };

        let permission = self
            .collaborators
            .permissions
            .check_permission(&campaign)
            .await;
        if permission.perform_ping {
            self.collaborators.refresh.request_refresh();
        }
        if !(campaign.has_impressions_left() && (permission.display || campaign.is_test())) {
            debug!(campaign_id = %campaign_id, "Tooltip not permitted");
            self.forget(&campaign_id);
            return;
        }

        let Some(images) = fetch_images(self.collaborators.images.as_ref(), &campaign).await
        else {
            self.forget(&campaign_id);
            return;
        };

        if !self.still_wanted(&campaign_id, &view_identifier, generation) {
            return;
        }

        let request = TooltipRequest {
            confirmation: DisplayConfirmation::new(&campaign, self.collaborators.contexts.clone()),
            image: images.into_iter().next(),
            view_identifier,
            campaign: campaign.clone(),
        };
        match self.router.present_tooltip(request).await {
            TooltipPresentation::Cancelled => {
                // Stays active; the next appearance of its view retries.
                self.state.lock().in_flight.remove(&campaign_id);
            }
            TooltipPresentation::Presented => self.on_presented(campaign),
        }
    }

    fn on_presented(self: Arc<Self>, campaign: Campaign) {
        let id = campaign.id().to_string();
        let updated = self
            .repository
            .decrement_impressions(&id)
            .unwrap_or_else(|| campaign.clone());
        info!(campaign_id = %id, "Tooltip displayed");
        metrics::counter!("inapp.tooltips.displayed").increment(1);

        let auto_dismiss = campaign
            .tooltip()
            .and_then(|t| t.auto_disappear_secs)
            .filter(|secs| *secs > 0)
            .map(|secs| {
                let inner = self.clone();
                let closing = id.clone();
                self.scheduler
                    .schedule(Duration::from_secs(secs), async move { inner.close(&closing) })
            });

        {
            let mut state = self.state.lock();
            state.in_flight.remove(&id);
            state.active.remove(&id);
            state.displayed.insert(id.clone());
            if let Some(work) = auto_dismiss {
                state.auto_dismiss.insert(id, work);
            }
        }

        flush_impressions(
            self.collaborators.impressions.clone(),
            self.collaborators.reporter.clone(),
            updated,
            vec![Impression::now(ImpressionType::Impression)],
        );
    }

    fn close(&self, campaign_id: &str) {
        {
            let mut state = self.state.lock();
            if !state.displayed.remove(campaign_id) {
                return;
            }
            if let Some(work) = state.auto_dismiss.remove(campaign_id) {
                work.cancel();
            }
        }
        self.router.dismiss_tooltip(campaign_id);
        debug!(campaign_id = %campaign_id, "Tooltip closed");

        if let Some(campaign) = self.repository.get(campaign_id) {
            flush_impressions(
                self.collaborators.impressions.clone(),
                self.collaborators.reporter.clone(),
                campaign,
                vec![Impression::now(ImpressionType::Exit)],
            );
        }
    }

    // Re-checked after the awaits: a reset or the view going away while the
    // permission check and image fetch ran cancels this presentation.
    fn still_wanted(&self, campaign_id: &str, view_identifier: &str, generation: u64) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation || !state.active.contains_key(campaign_id) {
            debug!(campaign_id = %campaign_id, "Tooltip reset before presentation");
            if state.generation == generation {
                state.in_flight.remove(campaign_id);
            }
            return false;
        }
        if !state.visible_views.contains(view_identifier) {
            debug!(
                campaign_id = %campaign_id,
                view = %view_identifier,
                "Tooltip target view disappeared"
            );
            state.in_flight.remove(campaign_id);
            return false;
        }
        true
    }

    fn forget(&self, campaign_id: &str) {
        let mut state = self.state.lock();
        state.in_flight.remove(campaign_id);
        state.active.remove(campaign_id);
    }
}
