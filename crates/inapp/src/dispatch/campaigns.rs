//! Serialized campaign display queue.

use campaign_core::config::DispatchConfig;
use campaign_core::types::{Campaign, Impression, ImpressionType};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    fetch_images, flush_impressions, CampaignRouter, DisplayCollaborators, DisplayConfirmation,
    DisplayOutcome, DisplayRequest,
};
use crate::repository::CampaignRepository;
use crate::scheduler::{ScheduledWork, WorkScheduler};

#[derive(Default)]
struct DispatchState {
    queue: VecDeque<String>,
    is_dispatching: bool,
    /// Bumped whenever a drain starts or is halted; a drain that sees a
    /// newer generation exits.
    generation: u64,
    display_in_flight: bool,
    scheduled: Option<ScheduledWork>,
}

enum Step {
    /// Move on to the next queued id right away.
    Next,
    /// Wait before the next id.
    Delay(Duration),
    /// End this drain cycle.
    Stop,
}

struct Inner {
    repository: Arc<CampaignRepository>,
    router: Arc<dyn CampaignRouter>,
    collaborators: DisplayCollaborators,
    scheduler: WorkScheduler,
    default_delay: Duration,
    state: Mutex<DispatchState>,
}

/// Displays queued campaigns one at a time.
///
/// Each item goes through permission check, image prefetch and the router's
/// confirm-then-display contract. A closed display consumes an impression and
/// delays the next item; a cancelled one consumes nothing and the queue moves
/// on immediately.
#[derive(Clone)]
pub struct CampaignDispatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CampaignDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("CampaignDispatcher")
            .field("queued", &state.queue.len())
            .field("is_dispatching", &state.is_dispatching)
            .finish()
    }
}

type DrainFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

impl CampaignDispatcher {
    pub fn new(
        repository: Arc<CampaignRepository>,
        router: Arc<dyn CampaignRouter>,
        collaborators: DisplayCollaborators,
        scheduler: WorkScheduler,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                repository,
                router,
                collaborators,
                scheduler,
                default_delay: config.default_display_delay(),
                state: Mutex::new(DispatchState::default()),
            }),
        }
    }

    pub fn add_to_queue(&self, campaign_id: impl Into<String>) {
        let campaign_id = campaign_id.into();
        debug!(campaign_id = %campaign_id, "Campaign queued for display");
        self.inner.state.lock().queue.push_back(campaign_id);
    }

    /// Starts draining the queue unless a drain is already running.
    pub fn dispatch_all_if_needed(&self) {
        let generation = {
            let mut state = self.inner.state.lock();
            if state.is_dispatching {
                return;
            }
            state.is_dispatching = true;
            state.generation += 1;
            state.generation
        };
        tokio::spawn(Inner::drain(self.inner.clone(), generation));
    }

    /// Drops pending ids. Dispatching halts right away unless a display is
    /// on screen, in which case the drain ends once it completes.
    pub fn reset_queue(&self) {
        let mut state = self.inner.state.lock();
        state.queue.clear();
        if let Some(scheduled) = state.scheduled.take() {
            scheduled.cancel();
            state.is_dispatching = false;
            state.generation += 1;
        } else if !state.display_in_flight {
            state.is_dispatching = false;
            state.generation += 1;
        }
        info!("Campaign queue reset");
    }

    pub fn is_dispatching(&self) -> bool {
        self.inner.state.lock().is_dispatching
    }

    pub fn queued_ids(&self) -> Vec<String> {
        self.inner.state.lock().queue.iter().cloned().collect()
    }

    pub fn is_queued(&self, campaign_id: &str) -> bool {
        self.inner.state.lock().queue.iter().any(|id| id == campaign_id)
    }
}

impl Inner {
    // Boxed so the scheduled continuation can name its own type.
    fn drain(inner: Arc<Inner>, generation: u64) -> DrainFuture {
        Box::pin(async move {
            loop {
                let campaign_id = {
                    let mut state = inner.state.lock();
                    if state.generation != generation {
                        return;
                    }
                    state.scheduled = None;
                    match state.queue.pop_front() {
                        Some(id) => {
                            state.display_in_flight = true;
                            id
                        }
                        None => {
                            state.is_dispatching = false;
                            return;
                        }
                    }
                };

                let step = inner.process(&campaign_id).await;

                let mut state = inner.state.lock();
                state.display_in_flight = false;
                if state.generation != generation {
                    return;
                }
                match step {
                    Step::Next => continue,
                    Step::Stop => {
                        state.is_dispatching = false;
                        return;
                    }
                    Step::Delay(_) if state.queue.is_empty() => {
                        state.is_dispatching = false;
                        return;
                    }
                    Step::Delay(delay) => {
                        debug!(delay_ms = delay.as_millis() as u64, "Next campaign scheduled");
                        let next = Inner::drain(inner.clone(), generation);
                        state.scheduled = Some(inner.scheduler.schedule(delay, next));
                        return;
                    }
                }
            }
        })
    }

    async fn process(&self, campaign_id: &str) -> Step {
        let Some(campaign) = self.repository.get(campaign_id) else {
            warn!(campaign_id = %campaign_id, "Queued campaign no longer exists");
            return Step::Stop;
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
            debug!(campaign_id = %campaign_id, "Campaign not permitted, skipping");
            metrics::counter!("inapp.campaigns.skipped").increment(1);
            return Step::Next;
        }

        let Some(images) = fetch_images(self.collaborators.images.as_ref(), &campaign).await
        else {
            metrics::counter!("inapp.campaigns.image_failures").increment(1);
            return Step::Next;
        };

        let request = DisplayRequest {
            confirmation: DisplayConfirmation::new(&campaign, self.collaborators.contexts.clone()),
            campaign: campaign.clone(),
            images,
        };
        match self.router.display_campaign(request).await {
            DisplayOutcome::Cancelled => {
                debug!(campaign_id = %campaign_id, "Display cancelled");
                metrics::counter!("inapp.campaigns.cancelled").increment(1);
                Step::Next
            }
            DisplayOutcome::Closed { impressions } => {
                self.complete_display(&campaign, impressions);
                Step::Delay(
                    campaign
                        .display_delay_ms()
                        .map(Duration::from_millis)
                        .unwrap_or(self.default_delay),
                )
            }
        }
    }

    fn complete_display(&self, campaign: &Campaign, impressions: Vec<Impression>) {
        let updated = self
            .repository
            .decrement_impressions(campaign.id())
            .unwrap_or_else(|| campaign.clone());
        info!(
            campaign_id = %campaign.id(),
            impressions_left = updated.impressions_left(),
            "Campaign displayed"
        );
        metrics::counter!("inapp.campaigns.displayed").increment(1);

        if impressions
            .iter()
            .any(|i| i.impression_type == ImpressionType::OptOut)
        {
            self.repository.opt_out(campaign.id());
        }

        let mut batch = Vec::with_capacity(impressions.len() + 1);
        batch.push(Impression::now(ImpressionType::Impression));
        batch.extend(impressions);
        flush_impressions(
            self.collaborators.impressions.clone(),
            self.collaborators.reporter.clone(),
            updated,
            batch,
        );
    }
}
