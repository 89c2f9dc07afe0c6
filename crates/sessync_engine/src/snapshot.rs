//! Snapshot fetching with timeout and retry.

use crate::config::PollConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SnapshotTransport;
use sessync_protocol::{SessionCommand, SessionSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Wraps a [`SnapshotTransport`] with the engine's request timeout.
pub struct SnapshotFetcher<S> {
    transport: Arc<S>,
    timeout: Duration,
}

impl<S> Clone for SnapshotFetcher<S> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            timeout: self.timeout,
        }
    }
}

impl<S: SnapshotTransport> SnapshotFetcher<S> {
    /// Creates a fetcher.
    pub fn new(transport: Arc<S>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Fetches one snapshot, failing with [`SyncError::Timeout`] when the
    /// transport does not answer in time.
    pub async fn fetch(&self) -> SyncResult<SessionSnapshot> {
        match tokio::time::timeout(self.timeout, self.transport.fetch_snapshot()).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout),
        }
    }

    /// Fetches a snapshot, retrying with backoff up to `policy.max_retries`
    /// times. Non-retryable errors end the loop early.
    pub async fn fetch_with_retry(&self, policy: &PollConfig) -> SyncResult<SessionSnapshot> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let error = match self.fetch().await {
                Ok(snapshot) => return Ok(snapshot),
                Err(e) => e,
            };

            let retry = attempts - 1;
            if !error.is_retryable() || retry >= policy.max_retries {
                warn!(attempts, error = %error, "initial snapshot fetch failed");
                return Err(SyncError::InitializationFailed {
                    attempts,
                    last_error: error.to_string(),
                });
            }

            let delay = policy.delay_for_attempt(retry + 1);
            debug!(attempt = attempts, ?delay, error = %error, "retrying snapshot fetch");
            tokio::time::sleep(delay).await;
        }
    }

    /// Sends a control command under the same timeout.
    pub async fn send_command(&self, command: SessionCommand) -> SyncResult<()> {
        match tokio::time::timeout(self.timeout, self.transport.send_command(command)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use sessync_protocol::SessionInfo;

    fn fetcher(transport: &MockTransport) -> SnapshotFetcher<MockTransport> {
        SnapshotFetcher::new(Arc::new(transport.clone()), Duration::from_secs(2))
    }

    fn policy() -> PollConfig {
        PollConfig::new(Duration::from_secs(1)).with_max_retries(3)
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_times_out() {
        let transport = MockTransport::new();
        transport.set_snapshot(SessionSnapshot::empty(1));
        transport.set_fetch_delay(Duration::from_secs(5));

        let err = fetcher(&transport).fetch().await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let transport = MockTransport::new();
        transport.set_snapshot(SessionSnapshot::with_session(4, SessionInfo::active("s", 0)));
        transport.fail_next_fetches(2);

        let start = tokio::time::Instant::now();
        let snapshot = fetcher(&transport).fetch_with_retry(&policy()).await.unwrap();

        assert_eq!(snapshot.timestamp, 4);
        assert_eq!(transport.fetch_count(), 3);
        // 1s + 2s of backoff
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_retry_budget() {
        let transport = MockTransport::new();
        transport.reject_fetches(true);

        let err = fetcher(&transport)
            .fetch_with_retry(&policy())
            .await
            .unwrap_err();

        match err {
            SyncError::InitializationFailed { attempts, .. } => assert_eq!(attempts, 4),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(transport.fetch_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_is_not_retried() {
        let transport = MockTransport::new();

        let err = fetcher(&transport)
            .fetch_with_retry(&policy())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::InitializationFailed { attempts: 1, .. }));
        assert_eq!(transport.fetch_count(), 1);
    }
}
