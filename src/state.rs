use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::{config::Config, store::Store};

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Config,
    pub locks: LearnerLocks,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Arc<Self> {
        Arc::new(Self {
            store,
            config,
            locks: LearnerLocks::default(),
        })
    }
}

/// One async mutex per learner. Enrollment, grading and review workflows
/// that write a learner's progress hold it for their whole read-modify-write.
#[derive(Default)]
pub struct LearnerLocks {
    inner: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl LearnerLocks {
    pub async fn acquire(&self, learner_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // forget locks nobody holds or waits on
            map.retain(|id, l| *id == learner_id || Arc::strong_count(l) > 1);
            map.entry(learner_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}
