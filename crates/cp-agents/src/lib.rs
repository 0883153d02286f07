//! Agent lifecycle reconciler (C8, §4.8). Periodically demotes agents
//! through `active -> inactive -> disconnected` and finally deletes them
//! based on heartbeat silence, without ever promoting a status back to
//! `active` — that recovery is the sync path's responsibility.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cp_core::clock::Clock;
use cp_core::error::{CoreError, CoreResult};
use cp_core::model::{Agent, AgentStatus};
use cp_core::runner::{Runner, RunnerState};
use cp_core::storage::{AgentFilter, ListOptions, Storage, MAX_LIST_LIMIT};
use tokio::sync::{Notify, RwLock};
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub tick_interval: StdDuration,
    pub default_heartbeat_seconds: i64,
    pub inactive_multiplier: u32,
    pub disconnect_multiplier: u32,
    pub delete_multiplier: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self::new(
            StdDuration::from_secs(10),
            30,
            2,
            5,
            10,
        )
    }
}

impl LifecycleConfig {
    /// Coerces the multipliers so `inactive < disconnect < delete` holds,
    /// bumping each violated level to one more than its predecessor.
    pub fn new(
        tick_interval: StdDuration,
        default_heartbeat_seconds: i64,
        inactive_multiplier: u32,
        disconnect_multiplier: u32,
        delete_multiplier: u32,
    ) -> Self {
        let inactive = inactive_multiplier.max(1);
        let disconnect = if disconnect_multiplier > inactive {
            disconnect_multiplier
        } else {
            inactive + 1
        };
        let delete = if delete_multiplier > disconnect {
            delete_multiplier
        } else {
            disconnect + 1
        };
        Self {
            tick_interval,
            default_heartbeat_seconds,
            inactive_multiplier: inactive,
            disconnect_multiplier: disconnect,
            delete_multiplier: delete,
        }
    }
}

/// Tick-driven `active -> inactive -> disconnected -> deleted` reconciler.
#[derive(Clone)]
pub struct LifecycleReconciler {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,
    state: Arc<RwLock<RunnerState>>,
    stop_notify: Arc<Notify>,
}

impl LifecycleReconciler {
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>, config: LifecycleConfig) -> Self {
        Self {
            storage,
            clock,
            config,
            state: Arc::new(RwLock::new(RunnerState::Stopped)),
            stop_notify: Arc::new(Notify::new()),
        }
    }

    /// Runs one reconciliation pass. Exposed directly so callers (and
    /// tests) can drive it without waiting on the ticker.
    pub async fn tick(&self) {
        let now = self.clock.now();
        let page = match self
            .storage
            .list_agents(
                AgentFilter::default(),
                ListOptions {
                    limit: MAX_LIST_LIMIT,
                    cursor: None,
                },
            )
            .await
        {
            Ok(page) => page,
            Err(e) => {
                error!("lifecycle tick failed to list agents: {e}");
                return;
            }
        };

        for agent in page.items {
            self.apply(agent, now).await;
        }
    }

    async fn apply(&self, agent: Agent, now: DateTime<Utc>) {
        let hb_seconds = match agent.heartbeat_interval_seconds {
            Some(seconds) if seconds > 0 => seconds,
            _ => self.config.default_heartbeat_seconds,
        };
        let silence_seconds = (now - agent.last_seen_at).num_seconds();

        if silence_seconds > hb_seconds * self.config.delete_multiplier as i64 {
            match self.storage.delete_agent(&agent.id).await {
                Ok(()) => info!(agent_id = %agent.id, silence_seconds, "agent deleted after heartbeat silence"),
                Err(e) => warn!(agent_id = %agent.id, "failed to delete silent agent: {e}"),
            }
        } else if silence_seconds > hb_seconds * self.config.disconnect_multiplier as i64 {
            self.transition(agent, AgentStatus::Disconnected, now).await;
        } else if silence_seconds > hb_seconds * self.config.inactive_multiplier as i64 {
            self.transition(agent, AgentStatus::Inactive, now).await;
        }
        // Otherwise: no-op. Recovery to `active` happens on the sync path.
    }

    async fn transition(&self, mut agent: Agent, status: AgentStatus, now: DateTime<Utc>) {
        if agent.status == status {
            return;
        }
        let agent_id = agent.id.clone();
        agent.status = status;
        agent.updated_at = now;
        match self.storage.upsert_agent(agent).await {
            Ok(_) => info!(agent_id = %agent_id, ?status, "agent status transitioned"),
            Err(e) => warn!(agent_id = %agent_id, "failed to upsert agent transition: {e}"),
        }
    }
}

#[async_trait]
impl Runner for LifecycleReconciler {
    async fn start(&self) -> CoreResult<()> {
        {
            let mut state = self.state.write().await;
            if *state == RunnerState::Running {
                return Err(CoreError::AlreadyStarted);
            }
            *state = RunnerState::Running;
        }

        let worker = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(worker.config.tick_interval);
            loop {
                if *worker.state.read().await != RunnerState::Running {
                    break;
                }
                tokio::select! {
                    _ = interval.tick() => {
                        if *worker.state.read().await != RunnerState::Running {
                            break;
                        }
                        worker.tick().await;
                    }
                    _ = worker.stop_notify.notified() => break,
                }
            }
        });
        Ok(())
    }

    async fn stop(&self) {
        let mut state = self.state.write().await;
        if *state == RunnerState::Stopped {
            return;
        }
        *state = RunnerState::Stopped;
        drop(state);
        self.stop_notify.notify_waiters();
    }

    fn name(&self) -> &str {
        "lifecycle-reconciler"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cp_core::clock::TestClock;
    use cp_core::model::{ApiVersion, EndpointType};
    use cp_storage_mem::InMemoryStorage;

    fn make_agent(id: &str, heartbeat: Option<i64>, last_seen_at: DateTime<Utc>, status: AgentStatus) -> Agent {
        Agent {
            id: id.into(),
            name: id.into(),
            endpoint: "http://localhost:9000".into(),
            endpoint_type: EndpointType::Http,
            api_version: ApiVersion::V1,
            os: "linux".into(),
            arch: "x86_64".into(),
            platform: "bare-metal".into(),
            uptime_seconds: 0,
            metadata: Default::default(),
            labels: Default::default(),
            last_seen_at,
            heartbeat_interval_seconds: heartbeat,
            status,
            created_at: last_seen_at,
            updated_at: last_seen_at,
        }
    }

    #[test]
    fn config_coerces_non_monotonic_multipliers() {
        let config = LifecycleConfig::new(StdDuration::from_secs(10), 30, 5, 3, 4);
        assert_eq!(config.inactive_multiplier, 5);
        assert_eq!(config.disconnect_multiplier, 6);
        assert_eq!(config.delete_multiplier, 7);
    }

    #[tokio::test]
    async fn tick_transitions_by_strictest_threshold() {
        let storage = Arc::new(InMemoryStorage::new());
        let t0 = Utc::now();
        let clock = TestClock::new(t0);

        storage
            .upsert_agent(make_agent("a-inactive", Some(10), t0, AgentStatus::Active))
            .await
            .unwrap();
        storage
            .upsert_agent(make_agent("a-disconnected", Some(10), t0, AgentStatus::Active))
            .await
            .unwrap();
        storage
            .upsert_agent(make_agent("a-deleted", Some(10), t0, AgentStatus::Active))
            .await
            .unwrap();
        storage
            .upsert_agent(make_agent("a-healthy", Some(10), t0, AgentStatus::Active))
            .await
            .unwrap();

        clock.advance(chrono::Duration::seconds(110));
        clock.set(t0 + chrono::Duration::seconds(25));
        let reconciler = LifecycleReconciler::new(
            storage.clone(),
            Arc::new(clock.clone()),
            LifecycleConfig::default(),
        );
        reconciler.tick().await;
        assert_eq!(
            storage.get_agent("a-inactive").await.unwrap().status,
            AgentStatus::Inactive
        );
        assert_eq!(
            storage.get_agent("a-healthy").await.unwrap().status,
            AgentStatus::Active
        );

        clock.set(t0 + chrono::Duration::seconds(60));
        reconciler.tick().await;
        assert_eq!(
            storage.get_agent("a-disconnected").await.unwrap().status,
            AgentStatus::Disconnected
        );

        clock.set(t0 + chrono::Duration::seconds(110));
        reconciler.tick().await;
        assert!(storage.get_agent("a-deleted").await.is_err());
    }

    #[tokio::test]
    async fn same_status_transition_is_skipped() {
        let storage = Arc::new(InMemoryStorage::new());
        let t0 = Utc::now();
        let silenced = make_agent("a1", Some(10), t0, AgentStatus::Inactive);
        let updated_at_before = silenced.updated_at;
        storage.upsert_agent(silenced).await.unwrap();

        let clock = TestClock::new(t0 + chrono::Duration::seconds(25));
        let reconciler =
            LifecycleReconciler::new(storage.clone(), Arc::new(clock), LifecycleConfig::default());
        reconciler.tick().await;

        let after = storage.get_agent("a1").await.unwrap();
        assert_eq!(after.status, AgentStatus::Inactive);
        assert_eq!(after.updated_at, updated_at_before);
    }

    #[tokio::test]
    async fn start_is_not_reentrant_and_stop_is_idempotent() {
        let storage = Arc::new(InMemoryStorage::new());
        let clock = Arc::new(TestClock::new(Utc::now()));
        let reconciler = LifecycleReconciler::new(storage, clock, LifecycleConfig::default());

        reconciler.start().await.unwrap();
        let err = reconciler.start().await.unwrap_err();
        assert_eq!(err, CoreError::AlreadyStarted);

        reconciler.stop().await;
        reconciler.stop().await;
    }
}
