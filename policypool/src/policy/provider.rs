//! Registry of policy executors by identifier.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use super::config::PolicySettings;
use super::executor::{PolicyExecutor, PolicyInner};
use super::state::ExecutorState;
use crate::error::ExecutorError;
use crate::pool::GlobalExecutor;
use crate::task::PolicyTask;
use crate::telemetry::TelemetrySink;

/// Creates policy executors bound to one global pool.
///
/// Identifiers are unique among live executors. The provider only holds
/// weak references; an executor whose handles are all dropped, or that has
/// terminated, frees its identifier.
pub struct PolicyExecutorProvider {
    global: GlobalExecutor,
    telemetry: Arc<dyn TelemetrySink>,
    executors: DashMap<String, Weak<PolicyInner>>,
}

impl PolicyExecutorProvider {
    pub fn new(global: GlobalExecutor, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            global,
            telemetry,
            executors: DashMap::new(),
        }
    }

    pub fn global(&self) -> &GlobalExecutor {
        &self.global
    }

    /// Creates an executor with default limits.
    pub fn create(&self, id: &str) -> Result<PolicyExecutor, ExecutorError> {
        self.create_with(id, PolicySettings::default())
    }

    pub fn create_with(
        &self,
        id: &str,
        settings: PolicySettings,
    ) -> Result<PolicyExecutor, ExecutorError> {
        let build = || {
            PolicyExecutor::with_settings(
                id,
                self.global.clone(),
                settings.clone(),
                Arc::clone(&self.telemetry),
            )
        };
        let executor = match self.executors.entry(id.to_string()) {
            Entry::Occupied(mut entry) => {
                if let Some(existing) = entry.get().upgrade() {
                    if existing.state.load() != ExecutorState::Terminated {
                        return Err(ExecutorError::illegal_state(format!(
                            "policy executor '{}' already exists",
                            id
                        )));
                    }
                }
                let executor = build()?;
                entry.insert(Arc::downgrade(&executor.inner));
                executor
            }
            Entry::Vacant(entry) => {
                let executor = build()?;
                entry.insert(Arc::downgrade(&executor.inner));
                executor
            }
        };
        info!(executor = id, "Policy executor registered");
        Ok(executor)
    }

    /// Returns the live executor registered under `id`.
    pub fn get(&self, id: &str) -> Option<PolicyExecutor> {
        self.executors
            .get(id)
            .and_then(|weak| weak.upgrade())
            .map(|inner| PolicyExecutor { inner })
    }

    /// Identifiers of every live executor, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .executors
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Every live executor, sorted by identifier.
    pub fn executors(&self) -> Vec<PolicyExecutor> {
        self.ids().iter().filter_map(|id| self.get(id)).collect()
    }

    pub fn shutdown_all(&self) {
        for executor in self.executors() {
            executor.shutdown();
        }
    }

    /// Calls `shutdown_now` on every executor and returns all tasks that
    /// never ran.
    pub fn shutdown_all_now(&self) -> Vec<Arc<dyn PolicyTask>> {
        self.executors()
            .iter()
            .flat_map(|executor| executor.shutdown_now())
            .collect()
    }

    /// Waits for every executor to terminate. Returns false on timeout.
    pub fn await_termination_all(&self, timeout: Duration) -> Result<bool, ExecutorError> {
        let deadline = Instant::now().checked_add(timeout);
        for executor in self.executors() {
            let remaining = deadline
                .map(|d| d.saturating_duration_since(Instant::now()))
                .unwrap_or(Duration::MAX);
            if !executor.await_termination(remaining)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Drops registry entries whose executor is gone.
    pub fn prune(&self) {
        self.executors.retain(|_, weak| weak.strong_count() > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use crate::telemetry::NullTelemetrySink;

    fn provider() -> PolicyExecutorProvider {
        let global =
            GlobalExecutor::new(PoolConfig::default().with_name("provider").with_threads(2, 2))
                .unwrap();
        PolicyExecutorProvider::new(global, Arc::new(NullTelemetrySink))
    }

    #[test]
    fn test_duplicate_ids_rejected_while_alive() {
        let provider = provider();
        let first = provider.create("io").unwrap();
        assert!(matches!(
            provider.create("io"),
            Err(ExecutorError::IllegalState(_))
        ));
        assert_eq!(provider.get("io").unwrap().id(), first.id());
        assert_eq!(provider.ids(), vec!["io".to_string()]);
    }

    #[test]
    fn test_id_reusable_after_termination() {
        let provider = provider();
        let first = provider.create("cpu").unwrap();
        first.shutdown();
        assert_eq!(first.await_termination(Duration::from_secs(5)), Ok(true));
        assert!(provider.create("cpu").is_ok());
    }

    #[test]
    fn test_id_reusable_after_drop() {
        let provider = provider();
        drop(provider.create("net").unwrap());
        assert!(provider.get("net").is_none());
        provider.prune();
        assert!(provider.ids().is_empty());
        assert!(provider.create("net").is_ok());
    }

    #[test]
    fn test_shutdown_all_now() {
        let provider = provider();
        let a = provider.create("a").unwrap();
        let b = provider.create("b").unwrap();
        assert!(provider.shutdown_all_now().is_empty());
        assert_eq!(a.state(), ExecutorState::TasksCanceled);
        assert_eq!(b.state(), ExecutorState::TasksCanceled);
        assert_eq!(provider.await_termination_all(Duration::from_secs(5)), Ok(true));
    }
}
