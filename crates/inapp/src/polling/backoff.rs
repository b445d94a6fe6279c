//! Retry cadence per error category.

use campaign_core::config::RetryConfig;
use campaign_core::ServiceError;
use rand::Rng;
use std::time::Duration;

use super::state_machine::{ResponseState, ResponseStateMachine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the given delay.
    Retry(Duration),
    /// Give up; `fatal` when retries were exhausted.
    Stop { fatal: bool },
}

/// Drives the delay between failed requests of one polling loop.
///
/// Rate limiting and server errors grow the delay by doubling plus a random
/// jitter; transport errors double it. Invalid configuration, undecodable
/// responses and client errors are not retried.
#[derive(Debug, Clone)]
pub struct BackoffController {
    config: RetryConfig,
    machine: ResponseStateMachine,
    delay: Duration,
}

impl BackoffController {
    pub fn new(config: RetryConfig) -> Self {
        let delay = config.initial_delay();
        Self {
            config,
            machine: ResponseStateMachine::new(),
            delay,
        }
    }

    pub fn state(&self) -> &ResponseStateMachine {
        &self.machine
    }

    /// Delay the next retry would use.
    pub fn current_delay(&self) -> Duration {
        self.delay
    }

    pub fn on_success(&mut self) {
        self.machine.push(ResponseState::Success);
        self.delay = self.config.initial_delay();
    }

    pub fn on_error(&mut self, error: &ServiceError) -> RetryDecision {
        self.machine.push(ResponseState::Error);

        match error {
            ServiceError::InvalidConfiguration(_)
            | ServiceError::Decoding(_)
            | ServiceError::ClientError(_) => RetryDecision::Stop { fatal: false },
            ServiceError::TooManyRequests => {
                if self.machine.previous_state() == ResponseState::Success {
                    self.delay = self.config.too_many_requests_delay();
                }
                RetryDecision::Retry(self.next_randomized())
            }
            ServiceError::ServerError(_) => {
                if self.machine.consecutive_error_count() < self.config.max_server_error_retries {
                    RetryDecision::Retry(self.next_randomized())
                } else {
                    RetryDecision::Stop { fatal: true }
                }
            }
            ServiceError::Transport(_) => {
                let delay = self.delay;
                self.delay = self.delay.saturating_mul(2);
                RetryDecision::Retry(delay)
            }
        }
    }

    fn next_randomized(&mut self) -> Duration {
        let delay = self.delay;
        let max_jitter = u64::try_from(self.config.max_jitter().as_millis()).unwrap_or(u64::MAX);
        let jitter = if max_jitter == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=max_jitter)
        };
        self.delay = delay
            .saturating_mul(2)
            .saturating_add(Duration::from_millis(jitter));
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> BackoffController {
        BackoffController::new(RetryConfig::default())
    }

    #[test]
    fn test_server_errors_retry_twice_then_fatal() {
        let mut backoff = controller();
        let first = backoff.on_error(&ServiceError::ServerError(500));
        let second = backoff.on_error(&ServiceError::ServerError(500));
        assert_eq!(first, RetryDecision::Retry(Duration::from_secs(10)));
        let RetryDecision::Retry(second) = second else {
            panic!("second 500 should retry");
        };
        assert!(second >= Duration::from_secs(20) && second <= Duration::from_secs(80));
        assert_eq!(
            backoff.on_error(&ServiceError::ServerError(503)),
            RetryDecision::Stop { fatal: true }
        );
    }

    #[test]
    fn test_rate_limit_after_success_uses_larger_floor() {
        let mut backoff = controller();
        backoff.on_success();
        assert_eq!(
            backoff.on_error(&ServiceError::TooManyRequests),
            RetryDecision::Retry(Duration::from_secs(60))
        );

        // A second 429 keeps growing from the elevated delay.
        let RetryDecision::Retry(next) = backoff.on_error(&ServiceError::TooManyRequests) else {
            panic!("429 should retry");
        };
        assert!(next >= Duration::from_secs(120) && next <= Duration::from_secs(180));
    }

    #[test]
    fn test_rate_limit_after_error_keeps_current_delay() {
        let mut backoff = controller();
        backoff.on_success();
        backoff.on_error(&ServiceError::Transport("reset".into()));
        assert_eq!(
            backoff.on_error(&ServiceError::TooManyRequests),
            RetryDecision::Retry(Duration::from_secs(20))
        );
    }

    #[test]
    fn test_transport_errors_double_without_jitter() {
        let mut backoff = controller();
        let delays: Vec<_> = (0..4)
            .map(|_| backoff.on_error(&ServiceError::Transport("timeout".into())))
            .collect();
        assert_eq!(
            delays,
            vec![
                RetryDecision::Retry(Duration::from_secs(10)),
                RetryDecision::Retry(Duration::from_secs(20)),
                RetryDecision::Retry(Duration::from_secs(40)),
                RetryDecision::Retry(Duration::from_secs(80)),
            ]
        );
        backoff.on_success();
        assert_eq!(backoff.current_delay(), Duration::from_secs(10));
    }

    #[test]
    fn test_terminal_errors_do_not_retry() {
        let mut backoff = controller();
        for error in [
            ServiceError::ClientError(404),
            ServiceError::Decoding("bad json".into()),
            ServiceError::InvalidConfiguration("no endpoint".into()),
        ] {
            assert_eq!(backoff.on_error(&error), RetryDecision::Stop { fatal: false });
        }
    }
}
