use std::sync::Arc;

use crate::core::{config::Settings, redis::RedisHandle};
use crate::repositories::store::ProgressionStore;
use crate::services::key_locks::LevelLocks;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    store: Arc<dyn ProgressionStore>,
    redis: RedisHandle,
    locks: LevelLocks,
}

impl AppState {
    pub(crate) fn new(
        settings: Settings,
        store: Arc<dyn ProgressionStore>,
        redis: RedisHandle,
    ) -> Self {
        Self { inner: Arc::new(InnerState { settings, store, redis, locks: LevelLocks::new() }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn store(&self) -> &dyn ProgressionStore {
        self.inner.store.as_ref()
    }

    pub(crate) fn redis(&self) -> &RedisHandle {
        &self.inner.redis
    }

    pub(crate) fn locks(&self) -> &LevelLocks {
        &self.inner.locks
    }
}
