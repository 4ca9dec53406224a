use std::collections::HashMap;

use crate::job::JobId;
use crate::worker::WorkerHandle;

/// In-flight workers keyed by job id.
///
/// Owned by the orchestrator task; workers never touch it.
#[derive(Debug, Default)]
pub struct ActiveWorkerRegistry {
    workers: HashMap<JobId, WorkerHandle>,
}

impl ActiveWorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handle and returns a reference to the stored entry.
    pub fn insert(&mut self, handle: WorkerHandle) -> &WorkerHandle {
        let id = handle.job_id();
        if self.workers.contains_key(&id) {
            tracing::warn!(job_id = %id, "Replacing an already registered worker");
        }
        self.workers.insert(id, handle);
        &self.workers[&id]
    }

    pub fn remove(&mut self, id: &JobId) -> Option<WorkerHandle> {
        self.workers.remove(id)
    }

    pub fn get(&self, id: &JobId) -> Option<&WorkerHandle> {
        self.workers.get(id)
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.workers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn ids(&self) -> Vec<JobId> {
        self.workers.keys().copied().collect()
    }

    /// Requests a cooperative stop from every worker.
    ///
    /// Returns how many had not been asked before.
    pub fn signal_all_stop(&self) -> usize {
        self.workers
            .values()
            .filter(|handle| handle.request_stop())
            .count()
    }

    /// Removes every entry, handing the handles back to the caller.
    pub fn drain(&mut self) -> Vec<WorkerHandle> {
        self.workers.drain().map(|(_, handle)| handle).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskKind;

    #[tokio::test]
    async fn insert_remove_and_signal() {
        let mut registry = ActiveWorkerRegistry::new();
        let a = WorkerHandle::detached(JobId::new(), TaskKind::Clustering);
        let b = WorkerHandle::detached(JobId::new(), TaskKind::FaceSearch);
        let (a_id, b_id) = (a.job_id(), b.job_id());

        registry.insert(a);
        registry.insert(b);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(&a_id));

        assert_eq!(registry.signal_all_stop(), 2);
        assert_eq!(registry.signal_all_stop(), 0);
        assert!(registry.get(&b_id).unwrap().is_stop_requested());

        assert!(registry.remove(&a_id).is_some());
        assert!(registry.remove(&a_id).is_none());
        assert_eq!(registry.ids(), vec![b_id]);

        assert_eq!(registry.drain().len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn signalling_an_empty_registry_is_fine() {
        let mut registry = ActiveWorkerRegistry::new();
        assert_eq!(registry.signal_all_stop(), 0);
        assert!(registry.drain().is_empty());
    }
}
