//! Campaign list polling actor.

use campaign_core::config::{PollingConfig, RetryConfig};
use campaign_core::reporting::{ErrorReporter, ErrorSource, ReportedError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backoff::{BackoffController, RetryDecision};
use super::service::CampaignListService;
use super::state_machine::ResponseState;
use crate::account::AccountRepository;
use crate::dispatch::RefreshRequester;
use crate::repository::CampaignRepository;
use crate::scheduler::WorkScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListCommand {
    /// Ping now, unless a retry after a failed ping is already pending.
    Refresh,
    Stop,
}

/// Notified after every successful sync of the campaign list.
pub trait SyncListener: Send + Sync {
    fn campaigns_synced(&self);
}

/// Sends commands to a running [`CampaignsListManager`].
#[derive(Debug, Clone)]
pub struct CampaignsListHandle {
    commands: mpsc::UnboundedSender<ListCommand>,
}

impl CampaignsListHandle {
    /// Creates the command channel ahead of the manager, so components
    /// built before it can already hold a handle.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ListCommand>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        (Self { commands }, receiver)
    }

    pub fn refresh(&self) {
        if self.commands.send(ListCommand::Refresh).is_err() {
            debug!("Campaign list poller is not running");
        }
    }

    pub fn stop(&self) {
        let _ = self.commands.send(ListCommand::Stop);
    }
}

impl RefreshRequester for CampaignsListHandle {
    fn request_refresh(&self) {
        self.refresh();
    }
}

/// Polls the campaign list on the server-provided cadence and backs off on
/// failures. Owns its backoff state; all interaction goes through
/// [`CampaignsListHandle`].
pub struct CampaignsListManager {
    service: Arc<dyn CampaignListService>,
    repository: Arc<CampaignRepository>,
    account: Arc<AccountRepository>,
    listener: Arc<dyn SyncListener>,
    scheduler: WorkScheduler,
    backoff: BackoffController,
    min_interval: Duration,
    reporter: Arc<dyn ErrorReporter>,
    commands: mpsc::UnboundedReceiver<ListCommand>,
}

impl CampaignsListManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        service: Arc<dyn CampaignListService>,
        repository: Arc<CampaignRepository>,
        account: Arc<AccountRepository>,
        listener: Arc<dyn SyncListener>,
        scheduler: WorkScheduler,
        retry: RetryConfig,
        polling: &PollingConfig,
        reporter: Arc<dyn ErrorReporter>,
        commands: mpsc::UnboundedReceiver<ListCommand>,
    ) -> Self {
        Self {
            service,
            repository,
            account,
            listener,
            scheduler,
            backoff: BackoffController::new(retry),
            min_interval: Duration::from_millis(polling.min_ping_interval_ms),
            reporter,
            commands,
        }
    }

    /// Starts polling right away on a new task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!("Campaign list polling started");
        let mut next_poll: Option<DateTime<Utc>> = Some(self.scheduler.now());

        loop {
            let scheduler = self.scheduler.clone();
            let wait = async move {
                match next_poll {
                    Some(deadline) => scheduler.sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ListCommand::Refresh) => {
                        if self.backing_off(next_poll) {
                            debug!("Refresh folded into the pending retry");
                        } else {
                            next_poll = self.poll_once().await;
                        }
                    }
                    Some(ListCommand::Stop) | None => break,
                },
                _ = wait => next_poll = self.poll_once().await,
            }
        }
        info!("Campaign list polling stopped");
    }

    // A refresh never jumps ahead of a scheduled retry: the retry delay is
    // the rate-limit and server-error floor.
    fn backing_off(&self, next_poll: Option<DateTime<Utc>>) -> bool {
        self.backoff.state().current_state() == ResponseState::Error
            && next_poll.is_some_and(|deadline| deadline > self.scheduler.now())
    }

    /// Pings once; returns when to ping next, or `None` to wait for a
    /// refresh command.
    async fn poll_once(&mut self) -> Option<DateTime<Utc>> {
        let user = self.account.user_info();
        match self.service.ping(&user).await {
            Ok(response) => {
                self.backoff.on_success();
                let campaigns = response.data.len();
                self.repository
                    .sync_with(response.data, response.current_ping_millis);
                self.listener.campaigns_synced();

                let interval = Duration::from_millis(response.next_ping_millis).max(self.min_interval);
                info!(
                    campaigns,
                    next_ping_ms = interval.as_millis() as u64,
                    "Campaign list synced"
                );
                metrics::counter!("inapp.poll.success").increment(1);
                Some(self.scheduler.deadline_after(interval))
            }
            Err(e) => match self.backoff.on_error(&e) {
                RetryDecision::Retry(delay) => {
                    warn!(
                        error = %e,
                        category = e.category(),
                        delay_ms = delay.as_millis() as u64,
                        consecutive_errors = self.backoff.state().consecutive_error_count(),
                        "Campaign list ping failed, retrying"
                    );
                    metrics::counter!("inapp.poll.retries").increment(1);
                    Some(self.scheduler.deadline_after(delay))
                }
                RetryDecision::Stop { fatal } => {
                    error!(error = %e, category = e.category(), fatal, "Campaign list ping failed");
                    metrics::counter!("inapp.poll.failures").increment(1);
                    self.reporter.report(ReportedError::new(
                        ErrorSource::CampaignList,
                        e.to_string(),
                        fatal,
                    ));
                    None
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::repository::tests::campaign_data;
    use crate::scheduler::TokioClock;
    use async_trait::async_trait;
    use campaign_core::config::SchedulerConfig;
    use campaign_core::reporting::capture_reporter;
    use campaign_core::types::{PingResponse, UserInfo};
    use campaign_core::ServiceError;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    struct ScriptedList {
        responses: Mutex<VecDeque<Result<PingResponse, ServiceError>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedList {
        fn new(responses: Vec<Result<PingResponse, ServiceError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_offsets(&self, start: Instant) -> Vec<Duration> {
            self.calls.lock().iter().map(|at| *at - start).collect()
        }
    }

    #[async_trait]
    impl CampaignListService for ScriptedList {
        async fn ping(&self, _user: &UserInfo) -> Result<PingResponse, ServiceError> {
            self.calls.lock().push(Instant::now());
            self.responses
                .lock()
                .pop_front()
                .unwrap_or(Err(ServiceError::ClientError(400)))
        }
    }

    #[derive(Default)]
    struct CountingListener(AtomicUsize);

    impl SyncListener for CountingListener {
        fn campaigns_synced(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn ok(next_ping_millis: u64, ids: &[&str]) -> Result<PingResponse, ServiceError> {
        Ok(PingResponse {
            next_ping_millis,
            current_ping_millis: 1_700_000_000_000,
            data: ids.iter().map(|id| campaign_data(id, 1)).collect(),
        })
    }

    struct Fixture {
        repository: Arc<CampaignRepository>,
        listener: Arc<CountingListener>,
        reporter: Arc<campaign_core::reporting::CaptureReporter>,
        handle: CampaignsListHandle,
    }

    fn start(service: Arc<ScriptedList>) -> Fixture {
        let reporter = capture_reporter();
        let repository = Arc::new(CampaignRepository::new(
            Arc::new(InMemoryCache::new()),
            reporter.clone(),
        ));
        let listener = Arc::new(CountingListener::default());
        let (handle, commands) = CampaignsListHandle::channel();
        let scheduler = WorkScheduler::new(&SchedulerConfig::default())
            .with_clock(Arc::new(TokioClock::new()));
        CampaignsListManager::new(
            service,
            repository.clone(),
            Arc::new(AccountRepository::new()),
            listener.clone(),
            scheduler,
            RetryConfig::default(),
            &PollingConfig::default(),
            reporter.clone(),
            commands,
        )
        .spawn();
        Fixture {
            repository,
            listener,
            reporter,
            handle,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_syncs_and_follows_server_interval() {
        let service = ScriptedList::new(vec![ok(30_000, &["a"]), ok(30_000, &["a", "b"])]);
        let start_at = Instant::now();
        let f = start(service.clone());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(f.repository.list().len(), 1);
        assert_eq!(f.listener.0.load(Ordering::SeqCst), 1);
        assert_eq!(f.repository.last_sync_millis(), Some(1_700_000_000_000));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(f.repository.list().len(), 2);
        let offsets = service.call_offsets(start_at);
        assert!(offsets[1] >= Duration::from_secs(30) && offsets[1] < Duration::from_millis(30_100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_server_errors_stop_with_fatal_report() {
        let service = ScriptedList::new(vec![
            Err(ServiceError::ServerError(500)),
            Err(ServiceError::ServerError(500)),
            Err(ServiceError::ServerError(500)),
            ok(30_000, &["a"]),
        ]);
        let start_at = Instant::now();
        let f = start(service.clone());

        tokio::time::sleep(Duration::from_secs(600)).await;
        let offsets = service.call_offsets(start_at);
        assert_eq!(offsets.len(), 3);
        assert!(offsets[1] >= Duration::from_secs(10) && offsets[1] < Duration::from_millis(10_100));
        let second_gap = offsets[2] - offsets[1];
        assert!(second_gap >= Duration::from_secs(20) && second_gap <= Duration::from_millis(80_100));

        assert_eq!(f.reporter.count_fatal(), 1);
        assert!(f.repository.list().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_after_success_waits_elevated_floor() {
        let service = ScriptedList::new(vec![
            ok(1_000, &["a"]),
            Err(ServiceError::TooManyRequests),
            ok(600_000, &["a"]),
        ]);
        let start_at = Instant::now();
        let _f = start(service.clone());

        tokio::time::sleep(Duration::from_secs(120)).await;
        let offsets = service.call_offsets(start_at);
        assert_eq!(offsets.len(), 3);
        let gap = offsets[2] - offsets[1];
        assert!(gap >= Duration::from_secs(60) && gap < Duration::from_millis(60_100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_waits_for_refresh() {
        let service = ScriptedList::new(vec![Err(ServiceError::ClientError(401)), ok(30_000, &["a"])]);
        let f = start(service.clone());

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(service.calls.lock().len(), 1);
        assert_eq!(f.reporter.count(), 1);
        assert_eq!(f.reporter.count_fatal(), 0);

        f.handle.refresh();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(service.calls.lock().len(), 2);
        assert_eq!(f.repository.list().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_does_not_cut_retry_backoff_short() {
        let service = ScriptedList::new(vec![Err(ServiceError::ServerError(503)), ok(30_000, &["a"])]);
        let start_at = Instant::now();
        let f = start(service.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        f.handle.refresh();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(service.calls.lock().len(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let offsets = service.call_offsets(start_at);
        assert_eq!(offsets.len(), 2);
        assert!(offsets[1] >= Duration::from_secs(10));
        assert_eq!(f.repository.list().len(), 1);

        // Healthy again: a refresh pings straight away.
        f.handle.refresh();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(service.calls.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_polling() {
        let service = ScriptedList::new(vec![ok(1_000, &["a"]), ok(1_000, &["a"]), ok(1_000, &["a"])]);
        let f = start(service.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;
        f.handle.stop();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(service.calls.lock().len(), 1);
    }
}
