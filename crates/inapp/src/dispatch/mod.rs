//! Display queues and the collaborator contracts they drive.
//!
//! Rendering, permission checks, image downloads and impression delivery
//! live outside the engine; the dispatchers only see the traits below.

pub mod campaigns;
pub mod tooltips;

pub use campaigns::CampaignDispatcher;
pub use tooltips::TooltipDispatcher;

use async_trait::async_trait;
use bytes::Bytes;
use campaign_core::reporting::{ErrorReporter, ErrorSource, ReportedError};
use campaign_core::types::{Campaign, DisplayPermission, Impression};
use campaign_core::ServiceError;
use std::sync::Arc;
use tracing::{debug, warn};

/// Decides whether a campaign may be shown right now. Must answer even when
/// its own transport fails, conservatively denying non-test campaigns.
#[async_trait]
pub trait PermissionOracle: Send + Sync {
    async fn check_permission(&self, campaign: &Campaign) -> DisplayPermission;
}

/// Downloads campaign images. `None` on any failure, never partial data.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Option<Bytes>;
}

/// Host hook asked before showing a campaign tagged with contexts.
pub trait ContextVerifier: Send + Sync {
    fn verify_context(&self, contexts: &[String], campaign_title: &str) -> bool;
}

/// Accepts every context.
pub struct AllowAllContexts;

impl ContextVerifier for AllowAllContexts {
    fn verify_context(&self, _contexts: &[String], _campaign_title: &str) -> bool {
        true
    }
}

/// Asks the list poller for an immediate, fire-and-forget refresh.
pub trait RefreshRequester: Send + Sync {
    fn request_refresh(&self);
}

#[async_trait]
pub trait ImpressionService: Send + Sync {
    async fn send_impressions(
        &self,
        campaign: &Campaign,
        impressions: Vec<Impression>,
    ) -> Result<(), ServiceError>;
}

/// Collaborators shared by the campaign and tooltip dispatchers.
#[derive(Clone)]
pub struct DisplayCollaborators {
    pub permissions: Arc<dyn PermissionOracle>,
    pub images: Arc<dyn ImageFetcher>,
    pub contexts: Arc<dyn ContextVerifier>,
    pub impressions: Arc<dyn ImpressionService>,
    pub refresh: Arc<dyn RefreshRequester>,
    pub reporter: Arc<dyn ErrorReporter>,
}

/// Lazily evaluated go/no-go check handed to the router with each display
/// request. Test campaigns and campaigns without contexts always proceed;
/// a `false` answer counts as a cancellation.
#[derive(Clone)]
pub struct DisplayConfirmation {
    title: String,
    contexts: Vec<String>,
    is_test: bool,
    verifier: Arc<dyn ContextVerifier>,
}

impl std::fmt::Debug for DisplayConfirmation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayConfirmation")
            .field("contexts", &self.contexts)
            .field("is_test", &self.is_test)
            .finish()
    }
}

impl DisplayConfirmation {
    pub fn new(campaign: &Campaign, verifier: Arc<dyn ContextVerifier>) -> Self {
        Self {
            title: campaign.title().to_string(),
            contexts: campaign.contexts(),
            is_test: campaign.is_test(),
            verifier,
        }
    }

    pub fn should_display(&self) -> bool {
        if self.is_test || self.contexts.is_empty() {
            return true;
        }
        self.verifier.verify_context(&self.contexts, &self.title)
    }
}

#[derive(Debug)]
pub struct DisplayRequest {
    pub campaign: Campaign,
    /// One entry for a single-image campaign, the whole set for a carousel.
    pub images: Vec<Bytes>,
    pub confirmation: DisplayConfirmation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayOutcome {
    Cancelled,
    /// The user closed the campaign; carries the interactions recorded while
    /// it was on screen.
    Closed { impressions: Vec<Impression> },
}

impl DisplayOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DisplayOutcome::Cancelled)
    }
}

#[async_trait]
pub trait CampaignRouter: Send + Sync {
    /// Resolves exactly once: when the campaign closes or the display is
    /// cancelled. The router evaluates `request.confirmation` right before
    /// showing and resolves with `Cancelled` when it says no.
    async fn display_campaign(&self, request: DisplayRequest) -> DisplayOutcome;

    /// Removes whatever campaign is on screen without waiting for the user.
    fn discard_displayed_campaign(&self);
}

#[derive(Debug)]
pub struct TooltipRequest {
    pub campaign: Campaign,
    /// Identifier of the visible view the tooltip is anchored to.
    pub view_identifier: String,
    pub image: Option<Bytes>,
    pub confirmation: DisplayConfirmation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TooltipPresentation {
    Presented,
    Cancelled,
}

#[async_trait]
pub trait TooltipRouter: Send + Sync {
    /// Resolves once the tooltip is on screen or the display was cancelled.
    async fn present_tooltip(&self, request: TooltipRequest) -> TooltipPresentation;

    fn dismiss_tooltip(&self, campaign_id: &str);
}

/// Downloads every image of `campaign`; `None` if any download fails.
pub(crate) async fn fetch_images(
    fetcher: &dyn ImageFetcher,
    campaign: &Campaign,
) -> Option<Vec<Bytes>> {
    let mut images = Vec::new();
    for url in campaign.image_urls() {
        match fetcher.fetch(&url).await {
            Some(image) => images.push(image),
            None => {
                debug!(campaign_id = %campaign.id(), url = %url, "Image fetch failed");
                return None;
            }
        }
    }
    Some(images)
}

/// Sends impressions in the background; failures are logged and reported.
pub(crate) fn flush_impressions(
    service: Arc<dyn ImpressionService>,
    reporter: Arc<dyn ErrorReporter>,
    campaign: Campaign,
    impressions: Vec<Impression>,
) {
    if impressions.is_empty() {
        return;
    }
    tokio::spawn(async move {
        if let Err(e) = service.send_impressions(&campaign, impressions).await {
            warn!(campaign_id = %campaign.id(), error = %e, "Failed to send impressions");
            reporter.report(ReportedError::new(
                ErrorSource::Impressions,
                e.to_string(),
                false,
            ));
        }
    });
}
