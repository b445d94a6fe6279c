//! Shared data model, configuration, and error taxonomy of the in-app
//! messaging engine.

pub mod config;
pub mod error;
pub mod reporting;
pub mod types;

pub use config::AppConfig;
pub use error::{CampaignError, CampaignResult, ServiceError};
pub use reporting::{ErrorReporter, ErrorSource, ReportedError};
