//! Event correlation: typed comparisons, trigger attribute checks, the
//! event matcher and the campaigns validator built on top of it.

pub mod attributes;
pub mod event_matcher;
pub mod utility;
pub mod validator;

pub use attributes::TriggerAttributesValidator;
pub use event_matcher::{ClaimError, EventMatcher};
pub use validator::CampaignsValidator;
