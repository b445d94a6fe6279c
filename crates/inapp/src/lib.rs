//! In-app messaging decision engine.
//!
//! Decides which campaign to show and when: logged events are matched
//! against campaign triggers, ready campaigns are queued and displayed one
//! at a time through host collaborators, and the campaign list is kept in
//! sync by a polling loop with per-error backoff. Rendering and transport
//! are left to the host through the traits in [`dispatch`], [`polling`] and
//! [`permission`].

pub mod account;
pub mod cache;
pub mod dispatch;
pub mod matching;
pub mod messaging;
pub mod permission;
pub mod polling;
pub mod repository;
pub mod scheduler;
pub mod trigger_agent;

pub use account::AccountRepository;
pub use cache::{CampaignCache, InMemoryCache, JsonFileCache};
pub use dispatch::{
    AllowAllContexts, CampaignDispatcher, CampaignRouter, ContextVerifier, DisplayCollaborators,
    DisplayConfirmation, DisplayOutcome, DisplayRequest, ImageFetcher, ImpressionService,
    PermissionOracle, RefreshRequester, TooltipDispatcher, TooltipPresentation, TooltipRequest,
    TooltipRouter,
};
pub use matching::{CampaignsValidator, ClaimError, EventMatcher, TriggerAttributesValidator};
pub use messaging::{Collaborators, InAppMessaging};
pub use permission::{DisplayPermissionService, RemotePermissionOracle};
pub use polling::{
    CampaignListService, CampaignsListHandle, CampaignsListManager, ConfigService,
    ConfigurationManager, FetchedConfig, ResponseStateMachine,
};
pub use repository::CampaignRepository;
pub use scheduler::{Clock, ScheduledWork, SystemClock, TokioClock, WorkScheduler};
pub use trigger_agent::CampaignTriggerAgent;
