use campaign_core::config::RetryConfig;
use campaign_core::reporting::{ErrorReporter, ErrorSource, ReportedError};
use campaign_core::types::ConfigEndpoints;
use campaign_core::ServiceError;
use rand::Rng;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::backoff::{BackoffController, RetryDecision};
use super::service::ConfigService;
use crate::scheduler::WorkScheduler;

/// Result of a configuration fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedConfig {
    /// Server switch combined with this session's rollout roll.
    pub enabled: bool,
    pub rollout_percentage: u8,
    pub endpoints: Option<ConfigEndpoints>,
}

impl FetchedConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            rollout_percentage: 0,
            endpoints: None,
        }
    }
}

pub struct ConfigurationManager {
    service: Arc<dyn ConfigService>,
    scheduler: WorkScheduler,
    backoff: BackoffController,
    reporter: Arc<dyn ErrorReporter>,
}

impl ConfigurationManager {
    pub fn new(
        service: Arc<dyn ConfigService>,
        scheduler: WorkScheduler,
        retry: RetryConfig,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            service,
            scheduler,
            backoff: BackoffController::new(retry),
            reporter,
        }
    }

    /// Fetches the configuration, retrying per error category until a
    /// response arrives or the error is terminal.
    pub async fn fetch_config(&mut self) -> Result<FetchedConfig, ServiceError> {
        loop {
            let error = match self.service.fetch_config().await {
                Ok(response) => {
                    self.backoff.on_success();
                    let enabled = response.enabled && roll_rollout(response.rollout_percentage);
                    if enabled {
                        let validated = match &response.endpoints {
                            Some(endpoints) => endpoints.validate(),
                            None => Err(ServiceError::InvalidConfiguration(
                                "enabled configuration without endpoints".into(),
                            )),
                        };
                        if let Err(e) = validated {
                            self.report(&e, false);
                            return Err(e);
                        }
                    }
                    info!(
                        enabled,
                        rollout_percentage = response.rollout_percentage,
                        "Configuration fetched"
                    );
                    return Ok(FetchedConfig {
                        enabled,
                        rollout_percentage: response.rollout_percentage,
                        endpoints: response.endpoints,
                    });
                }
                Err(e) => e,
            };

            match self.backoff.on_error(&error) {
                RetryDecision::Retry(delay) => {
                    warn!(
                        error = %error,
                        delay_ms = delay.as_millis() as u64,
                        "Configuration fetch failed, retrying"
                    );
                    metrics::counter!("inapp.config.retries").increment(1);
                    self.scheduler.sleep(delay).await;
                }
                RetryDecision::Stop { fatal } => {
                    self.report(&error, fatal);
                    return Err(error);
                }
            }
        }
    }

    fn report(&self, e: &ServiceError, fatal: bool) {
        error!(error = %e, category = e.category(), fatal, "Configuration fetch failed");
        self.reporter.report(ReportedError::new(
            ErrorSource::Configuration,
            e.to_string(),
            fatal,
        ));
    }
}

fn roll_rollout(percentage: u8) -> bool {
    rand::thread_rng().gen_range(0..100u8) < percentage
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TokioClock;
    use async_trait::async_trait;
    use campaign_core::config::SchedulerConfig;
    use campaign_core::reporting::capture_reporter;
    use campaign_core::types::ConfigResponse;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::time::Instant;

    struct ScriptedConfig(Mutex<VecDeque<Result<ConfigResponse, ServiceError>>>);

    #[async_trait]
    impl ConfigService for ScriptedConfig {
        async fn fetch_config(&self) -> Result<ConfigResponse, ServiceError> {
            self.0
                .lock()
                .pop_front()
                .unwrap_or(Err(ServiceError::ClientError(404)))
        }
    }

    fn endpoints() -> ConfigEndpoints {
        ConfigEndpoints {
            ping: "https://inapp.example.com/ping".into(),
            display_permission: Some("https://inapp.example.com/permission".into()),
            impression: None,
        }
    }

    fn response(enabled: bool, rollout: u8, endpoints: Option<ConfigEndpoints>) -> ConfigResponse {
        ConfigResponse {
            enabled,
            rollout_percentage: rollout,
            endpoints,
        }
    }

    fn manager(
        responses: Vec<Result<ConfigResponse, ServiceError>>,
    ) -> (ConfigurationManager, Arc<campaign_core::reporting::CaptureReporter>) {
        let reporter = capture_reporter();
        let scheduler = WorkScheduler::new(&SchedulerConfig::default())
            .with_clock(Arc::new(TokioClock::new()));
        let manager = ConfigurationManager::new(
            Arc::new(ScriptedConfig(Mutex::new(responses.into()))),
            scheduler,
            RetryConfig::default(),
            reporter.clone(),
        );
        (manager, reporter)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transport_errors_until_success() {
        let (mut manager, reporter) = manager(vec![
            Err(ServiceError::Transport("offline".into())),
            Err(ServiceError::Transport("offline".into())),
            Ok(response(true, 100, Some(endpoints()))),
        ]);
        let start = Instant::now();

        let config = manager.fetch_config().await.unwrap();
        assert!(config.enabled);
        assert_eq!(config.endpoints, Some(endpoints()));
        // 10s then 20s of exponential backoff.
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_millis(30_100));
        assert_eq!(reporter.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollout_and_switch() {
        let (mut manager, _) = manager(vec![
            Ok(response(true, 0, Some(endpoints()))),
            Ok(response(false, 100, None)),
        ]);
        assert!(!manager.fetch_config().await.unwrap().enabled);
        assert!(!manager.fetch_config().await.unwrap().enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_endpoint_is_reported() {
        let mut broken = endpoints();
        broken.ping = "not a url".into();
        let (mut manager, reporter) = manager(vec![Ok(response(true, 100, Some(broken)))]);

        let result = manager.fetch_config().await;
        assert!(matches!(result, Err(ServiceError::InvalidConfiguration(_))));
        assert_eq!(reporter.errors()[0].source, ErrorSource::Configuration);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_terminal() {
        let (mut manager, reporter) = manager(vec![Err(ServiceError::ClientError(403))]);
        assert_eq!(
            manager.fetch_config().await,
            Err(ServiceError::ClientError(403))
        );
        assert_eq!(reporter.count(), 1);
        assert_eq!(reporter.count_fatal(), 0);
    }
}
