//! Stability poller
//!
//! Re-reads live state on a fixed interval until a condition holds or the
//! timeout elapses. The last sleep is clamped to the deadline and reads are
//! raced against it, so `timeout` is a hard upper bound on the wait. The
//! poller only ever reads; it never retries a mutating call.

use crate::error::Result;
use async_trait::async_trait;
use deployfish_provider::InfrastructureClient;
use deployfish_types::LiveServiceState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Polling cadence and bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(600),
        }
    }
}

impl PollerConfig {
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }
}

/// What the poller waits for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "condition", rename_all = "snake_case")]
pub enum StabilityCondition {
    /// Running matches desired, nothing pending, no rollout in flight
    Stable,
    /// Stable at zero tasks (or the service is gone)
    Drained,
    /// Stable and the killed task is no longer listed
    Replaced { task_id: String },
}

impl fmt::Display for StabilityCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StabilityCondition::Stable => write!(f, "stable"),
            StabilityCondition::Drained => write!(f, "drained"),
            StabilityCondition::Replaced { task_id } => write!(f, "task {} replaced", task_id),
        }
    }
}

/// Result of a wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Stable { attempts: u32, elapsed: Duration },
    TimedOut { attempts: u32, elapsed: Duration },
}

impl PollOutcome {
    pub fn is_stable(&self) -> bool {
        matches!(self, PollOutcome::Stable { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Stable { attempts, .. } | PollOutcome::TimedOut { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            PollOutcome::Stable { elapsed, .. } | PollOutcome::TimedOut { elapsed, .. } => *elapsed,
        }
    }
}

/// Source of fresh live-state reads
#[async_trait]
pub trait LiveStateSource: Send + Sync {
    async fn service_state(&self) -> Result<LiveServiceState>;

    /// Ids of the service's running tasks
    async fn running_task_ids(&self) -> Result<Vec<String>>;
}

/// Reads a service through the infrastructure client
pub struct ServiceWatch<'a> {
    client: &'a dyn InfrastructureClient,
    cluster_name: &'a str,
    service_name: &'a str,
}

impl<'a> ServiceWatch<'a> {
    pub fn new(
        client: &'a dyn InfrastructureClient,
        cluster_name: &'a str,
        service_name: &'a str,
    ) -> Self {
        Self {
            client,
            cluster_name,
            service_name,
        }
    }
}

#[async_trait]
impl LiveStateSource for ServiceWatch<'_> {
    async fn service_state(&self) -> Result<LiveServiceState> {
        crate::observe::fetch_live_state(self.client, self.cluster_name, self.service_name).await
    }

    async fn running_task_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .client
            .list_running_task_instances(self.cluster_name, self.service_name)
            .await?
            .into_iter()
            .map(|t| t.task_id)
            .collect())
    }
}

/// Bounded polling loop
#[derive(Debug, Clone, Copy, Default)]
pub struct StabilityPoller {
    config: PollerConfig,
}

impl StabilityPoller {
    pub fn new(config: PollerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> PollerConfig {
        self.config
    }

    /// Poll `source` until `condition` holds or the timeout elapses
    pub async fn wait_for(
        &self,
        source: &dyn LiveStateSource,
        condition: &StabilityCondition,
    ) -> Result<PollOutcome> {
        let started = Instant::now();
        let deadline = started + self.config.timeout;
        let mut attempts = 0u32;

        info!(%condition, timeout_secs = self.config.timeout.as_secs(), "Waiting for service");

        loop {
            if Instant::now() >= deadline {
                break;
            }

            attempts += 1;
            let satisfied =
                match tokio::time::timeout_at(deadline, evaluate(source, condition)).await {
                    Ok(result) => result?,
                    Err(_) => break,
                };
            if satisfied {
                let elapsed = started.elapsed();
                info!(%condition, attempts, elapsed_ms = elapsed.as_millis() as u64, "Service settled");
                return Ok(PollOutcome::Stable { attempts, elapsed });
            }

            debug!(%condition, attempts, "Not yet settled");
            let next = (Instant::now() + self.config.interval).min(deadline);
            tokio::time::sleep_until(next).await;
        }

        let elapsed = started.elapsed();
        warn!(%condition, attempts, elapsed_secs = elapsed.as_secs(), "Timed out waiting for service");
        Ok(PollOutcome::TimedOut { attempts, elapsed })
    }
}

async fn evaluate(source: &dyn LiveStateSource, condition: &StabilityCondition) -> Result<bool> {
    let state = source.service_state().await?;
    Ok(match condition {
        StabilityCondition::Stable => state.is_stable(),
        StabilityCondition::Drained => {
            !state.exists || (state.is_stable() && state.running_count == 0)
        }
        StabilityCondition::Replaced { task_id } => {
            state.is_stable() && !source.running_task_ids().await?.contains(task_id)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use deployfish_types::{DeploymentSummary, RolloutState};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted reads, repeating the last one
    struct ScriptedSource {
        states: Mutex<VecDeque<LiveServiceState>>,
        task_ids: Mutex<Vec<String>>,
        reads: Mutex<u32>,
    }

    impl ScriptedSource {
        fn new(states: Vec<LiveServiceState>) -> Self {
            Self {
                states: Mutex::new(states.into()),
                task_ids: Mutex::new(Vec::new()),
                reads: Mutex::new(0),
            }
        }

        fn reads(&self) -> u32 {
            *self.reads.lock().unwrap()
        }
    }

    #[async_trait]
    impl LiveStateSource for ScriptedSource {
        async fn service_state(&self) -> Result<LiveServiceState> {
            *self.reads.lock().unwrap() += 1;
            let mut states = self.states.lock().unwrap();
            let state = if states.len() > 1 {
                states.pop_front().unwrap()
            } else {
                states.front().cloned().unwrap()
            };
            Ok(state)
        }

        async fn running_task_ids(&self) -> Result<Vec<String>> {
            Ok(self.task_ids.lock().unwrap().clone())
        }
    }

    struct HangingSource;

    #[async_trait]
    impl LiveStateSource for HangingSource {
        async fn service_state(&self) -> Result<LiveServiceState> {
            std::future::pending().await
        }

        async fn running_task_ids(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn state(running: u32, desired: u32) -> LiveServiceState {
        LiveServiceState {
            exists: true,
            running_count: running,
            desired_count_live: desired,
            deployments: vec![DeploymentSummary {
                id: "d-1".into(),
                task_definition_arn: "web:1".into(),
                desired_count: desired,
                running_count: running,
                rollout_state: RolloutState::Completed,
                created_at: chrono::DateTime::UNIX_EPOCH,
            }],
            ..LiveServiceState::absent("prod", "web")
        }
    }

    fn poller(interval: u64, timeout: u64) -> StabilityPoller {
        StabilityPoller::new(PollerConfig {
            interval: Duration::from_secs(interval),
            timeout: Duration::from_secs(timeout),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_stable_on_first_matching_read() {
        let source = ScriptedSource::new(vec![state(0, 2), state(1, 2), state(2, 2), state(1, 2)]);
        let outcome = poller(5, 600)
            .wait_for(&source, &StabilityCondition::Stable)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PollOutcome::Stable {
                attempts: 3,
                elapsed: Duration::from_secs(10)
            }
        );
        assert_eq!(source.reads(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_at_deadline() {
        let source = ScriptedSource::new(vec![state(1, 2)]);
        let outcome = poller(5, 12)
            .wait_for(&source, &StabilityCondition::Stable)
            .await
            .unwrap();

        // Reads at 0s, 5s and 10s; the final sleep is clamped to 12s
        assert!(!outcome.is_stable());
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(outcome.elapsed(), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_read_is_bounded() {
        let outcome = poller(5, 30)
            .wait_for(&HangingSource, &StabilityCondition::Stable)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            PollOutcome::TimedOut {
                attempts: 1,
                elapsed: Duration::from_secs(30)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_drained_requires_zero_running() {
        let source = ScriptedSource::new(vec![state(2, 2), state(1, 0), state(0, 0)]);
        let outcome = poller(5, 600)
            .wait_for(&source, &StabilityCondition::Drained)
            .await
            .unwrap();
        assert_eq!(outcome.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drained_when_service_gone() {
        let source = ScriptedSource::new(vec![LiveServiceState::absent("prod", "web")]);
        let outcome = poller(5, 600)
            .wait_for(&source, &StabilityCondition::Drained)
            .await
            .unwrap();
        assert!(outcome.is_stable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replaced_waits_for_task_to_disappear() {
        let source = ScriptedSource::new(vec![state(2, 2)]);
        *source.task_ids.lock().unwrap() = vec!["task-1".into(), "task-2".into()];

        let condition = StabilityCondition::Replaced {
            task_id: "task-1".into(),
        };
        let outcome = poller(5, 20).wait_for(&source, &condition).await.unwrap();
        assert!(!outcome.is_stable());

        *source.task_ids.lock().unwrap() = vec!["task-2".into(), "task-3".into()];
        let outcome = poller(5, 20).wait_for(&source, &condition).await.unwrap();
        assert!(outcome.is_stable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_never_reads() {
        let source = ScriptedSource::new(vec![state(2, 2)]);
        let outcome = poller(5, 0)
            .wait_for(&source, &StabilityCondition::Stable)
            .await
            .unwrap();
        assert!(!outcome.is_stable());
        assert_eq!(source.reads(), 0);
    }
}
