//! Background expiry sweeper
//!
//! Periodically removes contexts past their expiry, purges dead cache entries
//! (idempotency claims, abandoned stream chunks) when a cache is attached and,
//! when a registry is attached, marks agents with stale heartbeats offline. Sweeps run alongside
//! normal traffic; reads never wait on them.

use crate::agent::AgentRegistry;
use crate::config::SweeperConfig;
use crate::context::ContextManager;
use crate::error::ApiError;
use crate::storage::Cache;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub contexts_removed: usize,
    pub agents_marked_offline: usize,
    pub cache_entries_purged: usize,
}

pub struct ExpirySweeper {
    manager: Arc<ContextManager>,
    registry: Option<Arc<AgentRegistry>>,
    cache: Option<Arc<dyn Cache>>,
    interval: Duration,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ExpirySweeper {
    pub fn new(manager: Arc<ContextManager>, config: &SweeperConfig) -> Self {
        Self {
            manager,
            registry: None,
            cache: None,
            interval: config.interval(),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn with_registry(mut self, registry: Arc<AgentRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run one sweep now.
    pub async fn sweep_once(&self) -> Result<SweepReport, ApiError> {
        sweep(&self.manager, self.registry.as_deref(), self.cache.as_deref()).await
    }

    /// Start the periodic loop. Calling start on a running sweeper is a no-op.
    pub fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }

        let manager = Arc::clone(&self.manager);
        let registry = self.registry.clone();
        let cache = self.cache.clone();
        let cancel = self.cancel.clone();
        let period = self.interval;
        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_ms = period.as_millis() as u64, "Expiry sweeper started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match sweep(&manager, registry.as_deref(), cache.as_deref()).await {
                            Ok(report) => debug!(
                                contexts_removed = report.contexts_removed,
                                agents_marked_offline = report.agents_marked_offline,
                                cache_entries_purged = report.cache_entries_purged,
                                "Sweep finished"
                            ),
                            Err(e) => warn!(error = %e, "Sweep failed"),
                        }
                    }
                }
            }
            info!("Expiry sweeper stopped");
        }));
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stop the loop and wait for an in-flight sweep to finish.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Sweeper task ended abnormally");
            }
        }
    }
}

async fn sweep(
    manager: &ContextManager,
    registry: Option<&AgentRegistry>,
    cache: Option<&dyn Cache>,
) -> Result<SweepReport, ApiError> {
    let contexts_removed = manager.delete_expired().await?;
    let agents_marked_offline = match registry {
        Some(registry) => registry.mark_stale_offline().await?,
        None => 0,
    };
    let cache_entries_purged = match cache {
        Some(cache) => cache.purge_expired().await?,
        None => 0,
    };
    Ok(SweepReport {
        contexts_removed,
        agents_marked_offline,
        cache_entries_purged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentRegistration;
    use crate::config::BrokerConfig;
    use crate::context::CreateRequest;
    use crate::storage::{
        AgentStore, ContextFilters, ContextStore, MemoryAgentStore, MemoryCache, MemoryContextStore,
    };
    use chrono::Utc;

    async fn expired_fixture() -> (Arc<MemoryContextStore>, Arc<ContextManager>) {
        let store = Arc::new(MemoryContextStore::new());
        let manager = Arc::new(ContextManager::new(store.clone(), &BrokerConfig::default()));
        let ctx = manager
            .create(CreateRequest::new("doc", "agent-a", "t1"))
            .await
            .unwrap();
        let mut expired = ctx.clone();
        expired.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        store.update(&expired).await.unwrap();
        manager
            .create(CreateRequest::new("doc", "agent-a", "t1"))
            .await
            .unwrap();
        (store, manager)
    }

    #[tokio::test]
    async fn test_sweep_once_reports_both_counts() {
        let (_, manager) = expired_fixture().await;
        let agents = Arc::new(MemoryAgentStore::new());
        let registry = Arc::new(AgentRegistry::new(agents.clone(), &BrokerConfig::default()));
        let agent = registry
            .register(AgentRegistration::new("a1", "ml"))
            .await
            .unwrap();
        let mut stale = agent.clone();
        stale.last_seen = Utc::now() - chrono::Duration::hours(1);
        agents.update(&stale).await.unwrap();

        let sweeper = ExpirySweeper::new(manager, &SweeperConfig::default()).with_registry(registry);
        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                contexts_removed: 1,
                agents_marked_offline: 1,
                cache_entries_purged: 0,
            }
        );
        assert_eq!(sweeper.sweep_once().await.unwrap(), SweepReport::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_purges_dead_cache_entries() {
        let manager = Arc::new(ContextManager::new(
            Arc::new(MemoryContextStore::new()),
            &BrokerConfig::default(),
        ));
        let cache = Arc::new(MemoryCache::new());
        for i in 0..100 {
            cache
                .set_if_absent(&format!("idempotency:k{}", i), b"1".to_vec(), Duration::from_millis(1))
                .await
                .unwrap();
        }
        cache.set("stream:s1", b"{}".to_vec(), None).await.unwrap();
        tokio::time::advance(Duration::from_millis(20)).await;

        let sweeper =
            ExpirySweeper::new(manager, &SweeperConfig::default()).with_cache(cache.clone());
        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.cache_entries_purged, 100);
        assert_eq!(cache.entry_count(), 1);
        assert_eq!(sweeper.sweep_once().await.unwrap().cache_entries_purged, 0);
    }

    #[tokio::test]
    async fn test_background_loop_sweeps_and_stops() {
        let (store, manager) = expired_fixture().await;
        let sweeper = ExpirySweeper::new(manager, &SweeperConfig::default())
            .with_interval(Duration::from_millis(10));
        sweeper.start();
        sweeper.start();
        assert!(sweeper.is_running());

        for _ in 0..100 {
            if store.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(store.list(&ContextFilters::default()).await.unwrap().len(), 1);

        sweeper.stop().await;
        assert!(!sweeper.is_running());
    }
}
