//! In-flight chain batches
//!
//! One entry per chain while a block is being ingested. The entry is owned
//! by a [`ChainTaskGuard`] and disappears when the guard is dropped, on
//! success, error or cancellation alike.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use common::ChainId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTask {
    pub chain_id: ChainId,
    pub started_at: DateTime<Utc>,
    /// Last block fully processed by this task
    pub last_block: Option<i64>,
}

#[derive(Clone, Default)]
pub struct ChainTaskRegistry {
    tasks: Arc<Mutex<HashMap<ChainId, ChainTask>>>,
}

impl ChainTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `chain_id`; `None` while another task holds it
    pub fn try_start(&self, chain_id: ChainId) -> Option<ChainTaskGuard> {
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(&chain_id) {
            return None;
        }
        tasks.insert(
            chain_id,
            ChainTask {
                chain_id,
                started_at: Utc::now(),
                last_block: None,
            },
        );
        Some(ChainTaskGuard {
            registry: self.clone(),
            chain_id,
        })
    }

    pub fn is_running(&self, chain_id: ChainId) -> bool {
        self.tasks.lock().contains_key(&chain_id)
    }

    /// In-flight tasks ordered by chain id
    pub fn snapshot(&self) -> Vec<ChainTask> {
        let mut tasks: Vec<_> = self.tasks.lock().values().cloned().collect();
        tasks.sort_by_key(|t| t.chain_id);
        tasks
    }
}

pub struct ChainTaskGuard {
    registry: ChainTaskRegistry,
    chain_id: ChainId,
}

impl ChainTaskGuard {
    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn record_block(&self, block: i64) {
        if let Some(task) = self.registry.tasks.lock().get_mut(&self.chain_id) {
            task.last_block = Some(block);
        }
    }
}

impl Drop for ChainTaskGuard {
    fn drop(&mut self) {
        self.registry.tasks.lock().remove(&self.chain_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_task_per_chain() {
        let registry = ChainTaskRegistry::new();
        let guard = registry.try_start(1).unwrap();
        assert!(registry.try_start(1).is_none());
        let other = registry.try_start(2).unwrap();

        guard.record_block(812);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].last_block, Some(812));
        assert_eq!(snapshot[1].last_block, None);

        drop(guard);
        assert!(!registry.is_running(1));
        assert!(registry.try_start(1).is_some());
        assert_eq!(other.chain_id(), 2);
    }
}
