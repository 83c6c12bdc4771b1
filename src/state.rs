use std::sync::Arc;
use std::time::Duration;

use crate::{config::Config, db::Db, feed_cache::FeedCache, hub::UpdateHub};

/// Shared application state: the swappable database handle, the live-update
/// hub, the dashboard feed cache, and the process configuration.
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub hub: UpdateHub,
    pub feed_cache: FeedCache,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db: Db, config: Config) -> Self {
        let feed_cache = FeedCache::new(Duration::from_secs(config.feed_cache_ttl_secs));
        Self {
            db,
            hub: UpdateHub::new(),
            feed_cache,
            config: Arc::new(config),
        }
    }
}
