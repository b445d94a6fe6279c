//! Network polling: configuration fetch and campaign list sync, both driven
//! by the response state machine and per-category backoff.

pub mod backoff;
pub mod campaigns_list;
pub mod configuration;
pub mod service;
pub mod state_machine;

pub use backoff::{BackoffController, RetryDecision};
pub use campaigns_list::{CampaignsListHandle, CampaignsListManager, ListCommand, SyncListener};
pub use configuration::{ConfigurationManager, FetchedConfig};
pub use service::{CampaignListService, ConfigService};
pub use state_machine::{ResponseState, ResponseStateMachine};
