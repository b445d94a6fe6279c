//! Host-facing entry point wiring every engine component together.

use campaign_core::reporting::ErrorReporter;
use campaign_core::types::{Campaign, Event, UserInfo};
use campaign_core::{AppConfig, CampaignError, CampaignResult};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::account::AccountRepository;
use crate::cache::CampaignCache;
use crate::dispatch::{
    CampaignDispatcher, CampaignRouter, ContextVerifier, DisplayCollaborators, ImageFetcher,
    ImpressionService, TooltipDispatcher, TooltipRouter,
};
use crate::matching::EventMatcher;
use crate::permission::{DisplayPermissionService, RemotePermissionOracle};
use crate::polling::{
    CampaignListService, CampaignsListHandle, CampaignsListManager, ConfigService,
    ConfigurationManager, FetchedConfig,
};
use crate::repository::CampaignRepository;
use crate::scheduler::{Clock, WorkScheduler};
use crate::trigger_agent::CampaignTriggerAgent;

/// Everything the engine consumes from the host and the network layer.
#[derive(Clone)]
pub struct Collaborators {
    pub config_service: Arc<dyn ConfigService>,
    pub list_service: Arc<dyn CampaignListService>,
    pub permission_service: Arc<dyn DisplayPermissionService>,
    pub impressions: Arc<dyn ImpressionService>,
    pub images: Arc<dyn ImageFetcher>,
    pub router: Arc<dyn CampaignRouter>,
    pub tooltip_router: Arc<dyn TooltipRouter>,
    pub contexts: Arc<dyn ContextVerifier>,
    pub cache: Arc<dyn CampaignCache>,
    pub reporter: Arc<dyn ErrorReporter>,
    /// Wall clock for scheduled work; the system clock when `None`.
    pub clock: Option<Arc<dyn Clock>>,
}

/// A configured in-app messaging module. Must be created and used inside a
/// tokio runtime.
pub struct InAppMessaging {
    config: FetchedConfig,
    account: Arc<AccountRepository>,
    repository: Arc<CampaignRepository>,
    matcher: Arc<EventMatcher>,
    agent: Arc<CampaignTriggerAgent>,
    dispatcher: CampaignDispatcher,
    tooltips: TooltipDispatcher,
    router: Arc<dyn CampaignRouter>,
    list: CampaignsListHandle,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl InAppMessaging {
    /// Fetches the remote configuration and, when enabled, restores cached
    /// campaigns and starts polling.
    pub async fn configure(config: &AppConfig, collaborators: Collaborators) -> CampaignResult<Self> {
        let mut scheduler = WorkScheduler::new(&config.scheduler);
        if let Some(clock) = collaborators.clock.clone() {
            scheduler = scheduler.with_clock(clock);
        }

        let fetched = ConfigurationManager::new(
            collaborators.config_service.clone(),
            scheduler.clone(),
            config.retry.clone(),
            collaborators.reporter.clone(),
        )
        .fetch_config()
        .await?;
        if !fetched.enabled {
            info!("In-app messaging disabled by configuration");
            return Err(CampaignError::Disabled);
        }

        let account = Arc::new(AccountRepository::new());
        let repository = Arc::new(CampaignRepository::new(
            collaborators.cache.clone(),
            collaborators.reporter.clone(),
        ));
        repository.load_cached(&account.user_info().cache_key());
        let matcher = Arc::new(EventMatcher::new(repository.clone()));

        let (list, commands) = CampaignsListHandle::channel();
        let display = DisplayCollaborators {
            permissions: Arc::new(RemotePermissionOracle::new(
                collaborators.permission_service.clone(),
                repository.clone(),
                account.clone(),
                collaborators.reporter.clone(),
            )),
            images: collaborators.images.clone(),
            contexts: collaborators.contexts.clone(),
            impressions: collaborators.impressions.clone(),
            refresh: Arc::new(list.clone()),
            reporter: collaborators.reporter.clone(),
        };
        let dispatcher = CampaignDispatcher::new(
            repository.clone(),
            collaborators.router.clone(),
            display.clone(),
            scheduler.clone(),
            &config.dispatch,
        );
        let tooltips = TooltipDispatcher::new(
            repository.clone(),
            collaborators.tooltip_router.clone(),
            display,
            scheduler.clone(),
        );
        let agent = Arc::new(CampaignTriggerAgent::new(
            repository.clone(),
            matcher.clone(),
            dispatcher.clone(),
            tooltips.clone(),
        ));

        let poller = CampaignsListManager::new(
            collaborators.list_service.clone(),
            repository.clone(),
            account.clone(),
            agent.clone(),
            scheduler,
            config.retry.clone(),
            &config.polling,
            collaborators.reporter.clone(),
            commands,
        )
        .spawn();

        info!(
            rollout_percentage = fetched.rollout_percentage,
            cached_campaigns = repository.list().len(),
            "In-app messaging configured"
        );
        Ok(Self {
            config: fetched,
            account,
            repository,
            matcher,
            agent,
            dispatcher,
            tooltips,
            router: collaborators.router,
            list,
            poller: Mutex::new(Some(poller)),
        })
    }

    pub fn config(&self) -> &FetchedConfig {
        &self.config
    }

    pub fn log_event(&self, event: Event) {
        info!(event = %event.matching_name(), "Event logged");
        self.matcher.match_and_store(event);
        self.agent.validate_and_trigger_campaigns();
    }

    /// Registers the current user. A different user gets a clean slate:
    /// pending events and queued campaigns are dropped, that user's cached
    /// campaigns are restored and a fresh list is requested.
    pub fn register_preference(&self, user: UserInfo) {
        let key = user.cache_key();
        if !self.account.update_user_info(user) {
            return;
        }
        self.matcher.clear_non_persistent_events();
        self.dispatcher.reset_queue();
        self.tooltips.reset();
        self.repository.load_cached(&key);
        self.list.refresh();
    }

    /// Removes the campaign on screen; `clear_queue` also drops every
    /// campaign waiting behind it.
    pub fn close_message(&self, clear_queue: bool) {
        self.router.discard_displayed_campaign();
        if clear_queue {
            self.dispatcher.reset_queue();
        }
    }

    pub fn close_tooltip(&self, campaign_id: &str) {
        self.tooltips.close_tooltip(campaign_id);
    }

    pub fn view_did_appear(&self, view_identifier: impl Into<String>) {
        self.tooltips.view_did_appear(view_identifier);
    }

    pub fn view_did_disappear(&self, view_identifier: &str) {
        self.tooltips.view_did_disappear(view_identifier);
    }

    pub fn campaigns(&self) -> Vec<Campaign> {
        self.repository.list()
    }

    pub fn is_dispatching(&self) -> bool {
        self.dispatcher.is_dispatching()
    }

    /// Stops polling and drops queued campaigns.
    pub async fn shutdown(&self) {
        self.list.stop();
        self.dispatcher.reset_queue();
        let poller = self.poller.lock().take();
        if let Some(poller) = poller {
            let _ = poller.await;
        }
        info!("In-app messaging shut down");
    }
}
