use async_trait::async_trait;
use campaign_core::types::{ConfigResponse, PingResponse, UserInfo};
use campaign_core::ServiceError;

/// Remote campaign list endpoint.
#[async_trait]
pub trait CampaignListService: Send + Sync {
    async fn ping(&self, user: &UserInfo) -> Result<PingResponse, ServiceError>;
}

/// Remote configuration endpoint.
#[async_trait]
pub trait ConfigService: Send + Sync {
    async fn fetch_config(&self) -> Result<ConfigResponse, ServiceError>;
}
