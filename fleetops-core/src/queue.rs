//! Queue depth polling against the broker management API.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::error::{FleetError, Result};
use crate::models::ManagementEndpoint;

#[derive(Debug, Clone)]
pub struct PollOptions {
    /// Pause between two depth reads.
    pub interval: Duration,
    /// Give up once this much time has passed; `None` waits forever.
    pub timeout: Option<Duration>,
    /// Virtual host; `None` uses the inventory default.
    pub vhost: Option<String>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: None,
            vhost: None,
        }
    }
}

/// Anything able to report how many messages sit in a queue.
#[async_trait]
pub trait QueueDepthSource: Send + Sync {
    async fn queue_depth(&self, endpoint: &ManagementEndpoint, vhost: &str, queue: &str) -> Result<u64>;
}

#[derive(Debug, Deserialize)]
struct QueueInfo {
    #[serde(default)]
    messages: u64,
}

/// HTTP client for `GET /api/queues/{vhost}/{queue}`.
#[derive(Clone, Default)]
pub struct ManagementClient {
    http: reqwest::Client,
}

impl ManagementClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl QueueDepthSource for ManagementClient {
    async fn queue_depth(&self, endpoint: &ManagementEndpoint, vhost: &str, queue: &str) -> Result<u64> {
        let url = endpoint.queue_url(vhost, queue)?;
        let response = self
            .http
            .get(url)
            .basic_auth(&endpoint.username, Some(&endpoint.password))
            .header("User-Agent", "fleetops")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FleetError::Management { status: status.as_u16(), body });
        }

        let info: QueueInfo = response.json().await?;
        Ok(info.messages)
    }
}

/// Blocks the calling task until `queue` is observed empty.
///
/// The timeout is checked after each non-empty read, before sleeping, and the
/// sleep is cut short so that the last read happens right at the deadline.
pub async fn wait_until_empty<S>(
    source: &S,
    endpoint: &ManagementEndpoint,
    vhost: &str,
    queue: &str,
    opts: &PollOptions,
) -> Result<()>
where
    S: QueueDepthSource + ?Sized,
{
    let start = Instant::now();
    let mut reads = 0u64;

    loop {
        let depth = source.queue_depth(endpoint, vhost, queue).await?;
        reads += 1;
        if depth == 0 {
            info!("queue {} on {} drained after {} reads", queue, endpoint.address, reads);
            return Ok(());
        }

        let elapsed = start.elapsed();
        let pause = match opts.timeout {
            Some(limit) if elapsed >= limit => {
                return Err(FleetError::Timeout {
                    queue: queue.to_string(),
                    waited: elapsed,
                    last_depth: depth,
                });
            }
            Some(limit) => opts.interval.min(limit - elapsed),
            None => opts.interval,
        };
        debug!("queue {} holds {} messages, next read in {:?}", queue, depth, pause);
        sleep(pause).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays scripted depths, repeating the last one forever.
    struct Scripted {
        depths: Mutex<VecDeque<u64>>,
        reads: AtomicUsize,
    }

    impl Scripted {
        fn new(depths: &[u64]) -> Self {
            Self {
                depths: Mutex::new(depths.iter().copied().collect()),
                reads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl QueueDepthSource for Scripted {
        async fn queue_depth(&self, _: &ManagementEndpoint, _: &str, _: &str) -> Result<u64> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let mut depths = self.depths.lock().unwrap();
            let depth = if depths.len() > 1 { depths.pop_front().unwrap() } else { depths[0] };
            Ok(depth)
        }
    }

    fn endpoint() -> ManagementEndpoint {
        ManagementEndpoint {
            address: "127.0.0.1".into(),
            port: 15672,
            username: "guest".into(),
            password: "guest".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_once_queue_drains() {
        let source = Scripted::new(&[5, 3, 1, 0]);
        let opts = PollOptions { interval: Duration::from_millis(100), ..Default::default() };

        let started = Instant::now();
        wait_until_empty(&source, &endpoint(), "/", "jobs", &opts).await.unwrap();

        assert_eq!(source.reads.load(Ordering::SeqCst), 4);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(300) && waited < Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_queue_never_drains() {
        let source = Scripted::new(&[7]);
        let opts = PollOptions {
            interval: Duration::from_millis(400),
            timeout: Some(Duration::from_secs(1)),
            vhost: None,
        };

        let started = Instant::now();
        let err = wait_until_empty(&source, &endpoint(), "/", "jobs", &opts).await.unwrap_err();

        match err {
            FleetError::Timeout { queue, last_depth, waited } => {
                assert_eq!(queue, "jobs");
                assert_eq!(last_depth, 7);
                assert!(waited >= Duration::from_secs(1));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // reads at 0, 400ms, 800ms and at the 1s deadline
        assert_eq!(source.reads.load(Ordering::SeqCst), 4);
        assert!(started.elapsed() < Duration::from_millis(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_timeout_keeps_polling() {
        let source = Scripted::new(&[1]);
        let opts = PollOptions { interval: Duration::from_millis(250), ..Default::default() };

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            wait_until_empty(&source, &endpoint(), "/", "jobs", &opts),
        )
        .await;

        assert!(outcome.is_err(), "poll loop returned on a non-empty queue");
        assert!(source.reads.load(Ordering::SeqCst) >= 10);
    }

    #[tokio::test]
    async fn test_empty_queue_returns_immediately() {
        let source = Scripted::new(&[0]);
        wait_until_empty(&source, &endpoint(), "/", "jobs", &PollOptions::default())
            .await
            .unwrap();
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_queue_info_missing_messages_is_zero() {
        let info: QueueInfo = serde_json::from_str(r#"{"name":"jobs"}"#).unwrap();
        assert_eq!(info.messages, 0);
        let info: QueueInfo = serde_json::from_str(r#"{"name":"jobs","messages":12}"#).unwrap();
        assert_eq!(info.messages, 12);
    }
}
