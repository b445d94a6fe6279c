use async_trait::async_trait;
use campaign_core::reporting::{ErrorReporter, ErrorSource, ReportedError};
use campaign_core::types::{Campaign, DisplayPermission, UserInfo};
use campaign_core::ServiceError;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::account::AccountRepository;
use crate::dispatch::PermissionOracle;
use crate::repository::CampaignRepository;

/// Transport of the display permission endpoint.
#[async_trait]
pub trait DisplayPermissionService: Send + Sync {
    async fn check(
        &self,
        campaign_id: &str,
        user: &UserInfo,
        last_ping_millis: Option<i64>,
    ) -> Result<DisplayPermission, ServiceError>;
}

/// Permission oracle backed by the remote endpoint. Test campaigns skip the
/// request; failures deny the display.
pub struct RemotePermissionOracle {
    service: Arc<dyn DisplayPermissionService>,
    repository: Arc<CampaignRepository>,
    account: Arc<AccountRepository>,
    reporter: Arc<dyn ErrorReporter>,
}

impl RemotePermissionOracle {
    pub fn new(
        service: Arc<dyn DisplayPermissionService>,
        repository: Arc<CampaignRepository>,
        account: Arc<AccountRepository>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            service,
            repository,
            account,
            reporter,
        }
    }
}

#[async_trait]
impl PermissionOracle for RemotePermissionOracle {
    async fn check_permission(&self, campaign: &Campaign) -> DisplayPermission {
        if campaign.is_test() {
            return DisplayPermission {
                display: true,
                perform_ping: false,
            };
        }

        let user = self.account.user_info();
        match self
            .service
            .check(campaign.id(), &user, self.repository.last_sync_millis())
            .await
        {
            Ok(permission) => {
                debug!(
                    campaign_id = %campaign.id(),
                    display = permission.display,
                    perform_ping = permission.perform_ping,
                    "Display permission"
                );
                permission
            }
            Err(e) => {
                warn!(campaign_id = %campaign.id(), error = %e, "Display permission check failed");
                self.reporter.report(ReportedError::new(
                    ErrorSource::DisplayPermission,
                    e.to_string(),
                    false,
                ));
                DisplayPermission::denied()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::repository::tests::campaign_data;
    use campaign_core::reporting::{capture_reporter, noop_reporter};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedService {
        answer: Result<DisplayPermission, ServiceError>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DisplayPermissionService for FixedService {
        async fn check(
            &self,
            _campaign_id: &str,
            _user: &UserInfo,
            _last_ping_millis: Option<i64>,
        ) -> Result<DisplayPermission, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    fn oracle(
        answer: Result<DisplayPermission, ServiceError>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> (RemotePermissionOracle, Arc<FixedService>) {
        let service = Arc::new(FixedService {
            answer,
            calls: AtomicUsize::new(0),
        });
        let repository = Arc::new(CampaignRepository::new(
            Arc::new(InMemoryCache::new()),
            noop_reporter(),
        ));
        let oracle = RemotePermissionOracle::new(
            service.clone(),
            repository,
            Arc::new(AccountRepository::new()),
            reporter,
        );
        (oracle, service)
    }

    #[tokio::test]
    async fn test_forwards_service_answer() {
        let answer = DisplayPermission {
            display: true,
            perform_ping: true,
        };
        let (oracle, _) = oracle(Ok(answer), noop_reporter());
        let campaign = Campaign::new(campaign_data("c1", 1));
        assert_eq!(oracle.check_permission(&campaign).await, answer);
    }

    #[tokio::test]
    async fn test_failure_denies_and_reports() {
        let reporter = capture_reporter();
        let (oracle, _) = oracle(Err(ServiceError::ServerError(502)), reporter.clone());
        let campaign = Campaign::new(campaign_data("c1", 1));

        assert_eq!(
            oracle.check_permission(&campaign).await,
            DisplayPermission::denied()
        );
        assert_eq!(reporter.errors()[0].source, ErrorSource::DisplayPermission);
    }

    #[tokio::test]
    async fn test_test_campaigns_skip_the_request() {
        let (oracle, service) = oracle(Err(ServiceError::Transport("down".into())), noop_reporter());
        let mut data = campaign_data("t", 1);
        data.is_test = true;

        assert!(oracle.check_permission(&Campaign::new(data)).await.display);
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }
}
