// Bounded retry with exponential backoff for GitHub API operations.
// Transient server errors and rate limits are retried; auth, validation,
// and not-found conditions surface immediately.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use super::errors::GitHubError;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryHandler {
    config: RetryConfig,
}

impl RetryHandler {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `op` until it succeeds, fails non-transiently, or the attempt
    /// budget is spent. Rate-limited responses wait the full backoff cap
    /// before the next attempt.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, GitHubError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, octocrab::Error>>,
    {
        let mut last: Option<GitHubError> = None;

        for attempt in 0..self.config.max_attempts {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(operation, attempt = attempt + 1, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let err = GitHubError::from(err);
                    if !err.is_transient() {
                        return Err(err);
                    }
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        max = self.config.max_attempts,
                        error = %err,
                        "transient GitHub error"
                    );
                    let rate_limited = err.status() == Some(429)
                        || err.status() == Some(403);
                    last = Some(err);
                    if attempt + 1 < self.config.max_attempts {
                        tokio::time::sleep(self.delay_for(attempt, rate_limited)).await;
                    }
                }
            }
        }

        let message = last
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempts made".to_string());
        Err(GitHubError::RetryExhausted {
            operation: operation.to_string(),
            message,
        })
    }

    // Rate-limited responses wait the full cap; everything else backs off
    // exponentially from the base delay.
    fn delay_for(&self, attempt: u32, rate_limited: bool) -> Duration {
        if rate_limited {
            self.config.max_delay
        } else {
            std::cmp::min(
                self.config.base_delay * 2_u32.pow(attempt),
                self.config.max_delay,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_handler() -> RetryHandler {
        RetryHandler::new(RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        })
    }

    #[tokio::test]
    async fn succeeds_first_try() {
        let handler = fast_handler();
        let result = handler
            .run("noop", || async { Ok::<_, octocrab::Error>(42) })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let handler = fast_handler();
        assert_eq!(handler.delay_for(0, false), Duration::from_millis(100));
        assert_eq!(handler.delay_for(1, false), Duration::from_millis(200));
        assert_eq!(handler.delay_for(2, false), Duration::from_millis(350));
    }

    #[test]
    fn rate_limited_waits_full_cap() {
        let handler = fast_handler();
        assert_eq!(handler.delay_for(0, true), Duration::from_millis(350));
    }
}
