//! Rollout sync reconciler (C10, §4.10). Pushes actionable rollouts to
//! their target agents and exposes the public `deploy` operation that
//! seeds rollouts for a spec's targets.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cp_core::clock::Clock;
use cp_core::error::{CoreError, CoreResult};
use cp_core::model::Rollout;
use cp_core::runner::{Runner, RunnerState};
use cp_core::storage::{ListOptions, RolloutFilter, Storage, MAX_LIST_LIMIT};
use cp_proxy::{ProxyPool, TaskSubmission};
use tokio::sync::{Notify, RwLock};
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub tick_interval: StdDuration,
    pub push_timeout: StdDuration,
    pub max_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_interval: StdDuration::from_secs(10),
            push_timeout: StdDuration::from_secs(15),
            max_retries: 5,
        }
    }
}

#[derive(Clone)]
pub struct SyncReconciler {
    storage: Arc<dyn Storage>,
    pool: Arc<ProxyPool>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    state: Arc<RwLock<RunnerState>>,
    stop_notify: Arc<Notify>,
}

impl SyncReconciler {
    pub fn new(
        storage: Arc<dyn Storage>,
        pool: Arc<ProxyPool>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        Self {
            storage,
            pool,
            clock,
            config,
            state: Arc::new(RwLock::new(RunnerState::Stopped)),
            stop_notify: Arc::new(Notify::new()),
        }
    }

    /// Runs one reconciliation pass over actionable rollouts.
    pub async fn tick(&self) {
        let page = match self
            .storage
            .list_rollouts(
                RolloutFilter::default(),
                ListOptions {
                    limit: MAX_LIST_LIMIT,
                    cursor: None,
                },
            )
            .await
        {
            Ok(page) => page,
            Err(e) => {
                error!("sync tick failed to list rollouts: {e}");
                return;
            }
        };

        let actionable: Vec<Rollout> = page
            .items
            .into_iter()
            .filter(|rollout| rollout.is_actionable(self.config.max_retries))
            .collect();

        for rollout in actionable {
            let rollout_id = rollout.id.clone();
            let result = tokio::time::timeout(
                self.config.push_timeout,
                self.push(&rollout.id, &rollout.spec_id, &rollout.agent_id),
            )
            .await;
            if result.is_err() {
                warn!(rollout_id = %rollout_id, "rollout push timed out");
                self.mark_failed(&rollout_id, "push timed out".to_string(), self.clock.now())
                    .await;
            }
        }
    }

    /// Pushes one rollout's spec to its target agent.
    pub async fn push(&self, rollout_id: &str, spec_id: &str, agent_id: &str) {
        let now = self.clock.now();

        let spec = match self.storage.get_spec(spec_id).await {
            Ok(spec) => spec,
            Err(e) => {
                self.mark_failed(rollout_id, format!("spec not found: {e}"), now)
                    .await;
                return;
            }
        };

        let agent = match self.storage.get_agent(agent_id).await {
            Ok(agent) => agent,
            Err(e) => {
                self.mark_failed(rollout_id, format!("agent not found: {e}"), now)
                    .await;
                return;
            }
        };

        let proxy = match self
            .pool
            .get(
                &agent.endpoint,
                agent.endpoint_type.as_str(),
                agent.api_version.as_str(),
            )
            .await
        {
            Ok(proxy) => proxy,
            Err(e) => {
                self.mark_failed(rollout_id, format!("proxy error: {e}"), now)
                    .await;
                return;
            }
        };

        let submission = TaskSubmission {
            spec: spec.to_create_spec(),
        };
        if let Err(e) = proxy.submit_task(submission).await {
            self.mark_failed(rollout_id, format!("submit error: {e}"), now)
                .await;
            return;
        }

        self.mark_synced(rollout_id, spec.version, now).await;
    }

    /// Seeds or resets the rollouts for a spec's targets (§4.10's
    /// `Deploy`, part of the public API this core exposes).
    pub async fn deploy(&self, spec_id: &str) -> CoreResult<()> {
        let spec = self.storage.get_spec(spec_id).await?;
        let now = self.clock.now();

        for agent_id in spec.targets() {
            let rollout_id = Rollout::id_for(spec_id, agent_id);
            match self.storage.get_rollout(&rollout_id).await {
                Ok(mut rollout) => {
                    rollout.mark_pending(spec.version, now);
                    self.storage.upsert_rollout(rollout).await?;
                }
                Err(e) if e.is_not_found() => {
                    let rollout =
                        Rollout::new_pending(spec_id.to_string(), agent_id.clone(), spec.version, now);
                    self.storage.upsert_rollout(rollout).await?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, rollout_id: &str, message: String, now: DateTime<Utc>) {
        match self.storage.get_rollout(rollout_id).await {
            Ok(mut rollout) => {
                rollout.mark_failed(message.clone(), now);
                match self.storage.upsert_rollout(rollout).await {
                    Ok(_) => warn!(rollout_id = %rollout_id, reason = %message, "rollout marked failed"),
                    Err(e) => warn!(rollout_id = %rollout_id, "failed to persist failed rollout: {e}"),
                }
            }
            Err(e) => warn!(rollout_id = %rollout_id, "failed to reload rollout before marking failed: {e}"),
        }
    }

    async fn mark_synced(&self, rollout_id: &str, actual_version: i64, now: DateTime<Utc>) {
        match self.storage.get_rollout(rollout_id).await {
            Ok(mut rollout) => {
                rollout.mark_synced(actual_version, now);
                match self.storage.upsert_rollout(rollout).await {
                    Ok(_) => info!(rollout_id = %rollout_id, "rollout synced"),
                    Err(e) => warn!(rollout_id = %rollout_id, "failed to persist synced rollout: {e}"),
                }
            }
            Err(e) => warn!(rollout_id = %rollout_id, "failed to reload rollout before marking synced: {e}"),
        }
    }
}

#[async_trait]
impl Runner for SyncReconciler {
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
        "sync-reconciler"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cp_core::clock::TestClock;
    use cp_core::model::{Rollout, RolloutStatus, Spec};
    use cp_proxy::ProxyPoolConfig;
    use cp_storage_mem::InMemoryStorage;
    use serde_json::json;

    fn reconciler(storage: Arc<InMemoryStorage>, clock: Arc<dyn Clock>) -> SyncReconciler {
        let pool = Arc::new(ProxyPool::new(ProxyPoolConfig::default()).unwrap());
        SyncReconciler::new(storage, pool, clock, SyncConfig::default())
    }

    #[tokio::test]
    async fn deploy_creates_pending_rollouts_for_new_targets() {
        let storage = Arc::new(InMemoryStorage::new());
        let clock = Arc::new(TestClock::new(Utc::now()));
        let spec = Spec {
            id: "spec-1".into(),
            version: 1,
            targets: vec!["agent-a".into(), "agent-b".into()],
            payload: json!({"k": "v"}),
        };
        storage.upsert_spec(spec).await.unwrap();

        let sync = reconciler(storage.clone(), clock);
        sync.deploy("spec-1").await.unwrap();

        for agent_id in ["agent-a", "agent-b"] {
            let rollout_id = Rollout::id_for("spec-1", agent_id);
            let rollout = storage.get_rollout(&rollout_id).await.unwrap();
            assert_eq!(rollout.status, RolloutStatus::Pending);
            assert_eq!(rollout.desired_version, 1);
        }
    }

    #[tokio::test]
    async fn deploy_resets_an_existing_failed_rollout_to_pending() {
        let storage = Arc::new(InMemoryStorage::new());
        let clock = Arc::new(TestClock::new(Utc::now()));
        let spec = Spec {
            id: "spec-1".into(),
            version: 2,
            targets: vec!["agent-a".into()],
            payload: json!({}),
        };
        storage.upsert_spec(spec).await.unwrap();

        let rollout_id = Rollout::id_for("spec-1", "agent-a");
        let mut rollout = Rollout::new_pending("spec-1".into(), "agent-a".into(), 1, Utc::now());
        rollout.mark_failed("boom", Utc::now());
        assert_eq!(rollout.attempts, 1);
        storage.upsert_rollout(rollout).await.unwrap();

        let sync = reconciler(storage.clone(), clock);
        sync.deploy("spec-1").await.unwrap();

        let reloaded = storage.get_rollout(&rollout_id).await.unwrap();
        assert_eq!(reloaded.status, RolloutStatus::Pending);
        assert_eq!(reloaded.attempts, 0);
        assert_eq!(reloaded.desired_version, 2);
        assert!(reloaded.err_msg.is_none());
    }

    #[tokio::test]
    async fn push_marks_failed_when_spec_missing() {
        let storage = Arc::new(InMemoryStorage::new());
        let clock = Arc::new(TestClock::new(Utc::now()));
        let rollout = Rollout::new_pending("missing-spec".into(), "agent-a".into(), 1, Utc::now());
        storage.upsert_rollout(rollout.clone()).await.unwrap();

        let sync = reconciler(storage.clone(), clock);
        sync.push(&rollout.id, "missing-spec", "agent-a").await;

        let reloaded = storage.get_rollout(&rollout.id).await.unwrap();
        assert_eq!(reloaded.status, RolloutStatus::Failed);
        assert_eq!(reloaded.attempts, 1);
        assert!(reloaded.err_msg.as_ref().unwrap().contains("spec not found"));
    }

    #[tokio::test]
    async fn push_marks_failed_when_agent_missing() {
        let storage = Arc::new(InMemoryStorage::new());
        let clock = Arc::new(TestClock::new(Utc::now()));
        let spec = Spec {
            id: "spec-1".into(),
            version: 1,
            targets: vec!["missing-agent".into()],
            payload: json!({}),
        };
        storage.upsert_spec(spec).await.unwrap();
        let rollout = Rollout::new_pending("spec-1".into(), "missing-agent".into(), 1, Utc::now());
        storage.upsert_rollout(rollout.clone()).await.unwrap();

        let sync = reconciler(storage.clone(), clock);
        sync.push(&rollout.id, "spec-1", "missing-agent").await;

        let reloaded = storage.get_rollout(&rollout.id).await.unwrap();
        assert_eq!(reloaded.status, RolloutStatus::Failed);
        assert!(reloaded.err_msg.as_ref().unwrap().contains("agent not found"));
    }

    #[tokio::test]
    async fn tick_skips_synced_and_exhausted_rollouts() {
        let storage = Arc::new(InMemoryStorage::new());
        let clock = Arc::new(TestClock::new(Utc::now()));

        let mut synced = Rollout::new_pending("spec-1".into(), "agent-synced".into(), 1, Utc::now());
        synced.mark_synced(1, Utc::now());
        storage.upsert_rollout(synced).await.unwrap();

        let mut exhausted =
            Rollout::new_pending("spec-1".into(), "agent-exhausted".into(), 1, Utc::now());
        for _ in 0..5 {
            exhausted.mark_failed("boom", Utc::now());
        }
        storage.upsert_rollout(exhausted.clone()).await.unwrap();

        let pending = Rollout::new_pending("spec-1".into(), "agent-pending".into(), 1, Utc::now());
        storage.upsert_rollout(pending.clone()).await.unwrap();

        let sync = reconciler(storage.clone(), clock);
        sync.tick().await;

        // Neither the synced nor the retry-exhausted rollout should have
        // been touched; the pending one (with no matching spec) should
        // have failed exactly once.
        let reloaded_exhausted = storage.get_rollout(&exhausted.id).await.unwrap();
        assert_eq!(reloaded_exhausted.attempts, 5);
        let reloaded_pending = storage.get_rollout(&pending.id).await.unwrap();
        assert_eq!(reloaded_pending.status, RolloutStatus::Failed);
        assert_eq!(reloaded_pending.attempts, 1);
    }
}
