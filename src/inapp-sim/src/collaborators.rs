//! Fixture-backed services and logging display collaborators.

use async_trait::async_trait;
use bytes::Bytes;
use campaign_core::reporting::{ErrorReporter, ReportedError};
use campaign_core::types::{
    Campaign, ConfigEndpoints, ConfigResponse, DisplayPermission, Impression, ImpressionType,
    PingResponse, UserInfo,
};
use campaign_core::ServiceError;
use campaign_inapp::{
    CampaignListService, CampaignRouter, ConfigService, DisplayOutcome, DisplayPermissionService,
    DisplayRequest, ImageFetcher, ImpressionService, TooltipPresentation, TooltipRequest,
    TooltipRouter,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Always enabled, fully rolled out.
pub struct StaticConfig;

#[async_trait]
impl ConfigService for StaticConfig {
    async fn fetch_config(&self) -> Result<ConfigResponse, ServiceError> {
        Ok(ConfigResponse {
            enabled: true,
            rollout_percentage: 100,
            endpoints: Some(ConfigEndpoints {
                ping: "https://inapp.sim.local/ping".into(),
                display_permission: Some("https://inapp.sim.local/permission".into()),
                impression: Some("https://inapp.sim.local/impression".into()),
            }),
        })
    }
}

/// Answers every ping with the campaign list read from a JSON file. The
/// file is re-read on each ping so it can be edited while the sim runs.
pub struct FixtureList {
    path: PathBuf,
}

impl FixtureList {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl CampaignListService for FixtureList {
    async fn ping(&self, user: &UserInfo) -> Result<PingResponse, ServiceError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        let response: PingResponse =
            serde_json::from_str(&raw).map_err(|e| ServiceError::Decoding(e.to_string()))?;
        info!(
            user_key = %user.cache_key(),
            campaigns = response.data.len(),
            "Ping served from fixture"
        );
        Ok(response)
    }
}

pub struct AllowAll;

#[async_trait]
impl DisplayPermissionService for AllowAll {
    async fn check(
        &self,
        _campaign_id: &str,
        _user: &UserInfo,
        _last_ping_millis: Option<i64>,
    ) -> Result<DisplayPermission, ServiceError> {
        Ok(DisplayPermission {
            display: true,
            perform_ping: false,
        })
    }
}

pub struct LoggingImpressions;

#[async_trait]
impl ImpressionService for LoggingImpressions {
    async fn send_impressions(
        &self,
        campaign: &Campaign,
        impressions: Vec<Impression>,
    ) -> Result<(), ServiceError> {
        let types: Vec<_> = impressions
            .iter()
            .map(|i| format!("{:?}", i.impression_type))
            .collect();
        info!(campaign_id = %campaign.id(), impressions = ?types, "Impressions sent");
        Ok(())
    }
}

/// Images are never downloaded; every url resolves to its own bytes.
pub struct EchoImages;

#[async_trait]
impl ImageFetcher for EchoImages {
    async fn fetch(&self, url: &str) -> Option<Bytes> {
        Some(Bytes::copy_from_slice(url.as_bytes()))
    }
}

/// Keeps each campaign "on screen" for a fixed time, then closes it as if
/// the user had clicked through.
pub struct LoggingRouter {
    on_screen: Duration,
    displayed: Mutex<Vec<String>>,
}

impl LoggingRouter {
    pub fn new(on_screen: Duration) -> Self {
        Self {
            on_screen,
            displayed: Mutex::new(Vec::new()),
        }
    }

    pub fn displayed(&self) -> Vec<String> {
        self.displayed.lock().clone()
    }
}

#[async_trait]
impl CampaignRouter for LoggingRouter {
    async fn display_campaign(&self, request: DisplayRequest) -> DisplayOutcome {
        if !request.confirmation.should_display() {
            warn!(campaign_id = %request.campaign.id(), "Display declined by context check");
            return DisplayOutcome::Cancelled;
        }
        info!(
            campaign_id = %request.campaign.id(),
            title = %request.campaign.title(),
            images = request.images.len(),
            "Campaign on screen"
        );
        self.displayed
            .lock()
            .push(request.campaign.id().to_string());
        tokio::time::sleep(self.on_screen).await;
        DisplayOutcome::Closed {
            impressions: vec![Impression::now(ImpressionType::Click)],
        }
    }

    fn discard_displayed_campaign(&self) {
        info!("Displayed campaign discarded");
    }
}

pub struct LoggingTooltips;

#[async_trait]
impl TooltipRouter for LoggingTooltips {
    async fn present_tooltip(&self, request: TooltipRequest) -> TooltipPresentation {
        if !request.confirmation.should_display() {
            return TooltipPresentation::Cancelled;
        }
        info!(
            campaign_id = %request.campaign.id(),
            view = %request.view_identifier,
            "Tooltip presented"
        );
        TooltipPresentation::Presented
    }

    fn dismiss_tooltip(&self, campaign_id: &str) {
        info!(campaign_id = %campaign_id, "Tooltip dismissed");
    }
}

/// Forwards reported engine errors to the log.
pub struct LoggingReporter;

impl ErrorReporter for LoggingReporter {
    fn report(&self, error: ReportedError) {
        tracing::error!(
            source = ?error.source,
            fatal = error.fatal,
            error = %error.message,
            "Engine error reported"
        );
    }
}
