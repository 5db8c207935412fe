pub mod api;
pub mod config;
pub mod db;
pub mod session;
pub mod storage;

pub use db::DbPool;

use config::Config;
use std::sync::Arc;

use crate::api::rate_limit::RateLimiter;
use crate::storage::FileStore;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub file_store: FileStore,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Self {
        let file_store = FileStore::new(&config.storage);
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        Self {
            config,
            db,
            file_store,
            rate_limiter,
        }
    }
}
