use std::path::PathBuf;

use crate::db::DbPool;
use crate::ws::actor::KeepAlive;
use crate::ws::Hub;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// Live connection registry
    pub hub: Hub,
    /// Ping cadence for live sockets
    pub keepalive: KeepAlive,
    /// Where message images are written and served from
    pub images_dir: PathBuf,
    /// Largest accepted message image, in bytes
    pub max_image_bytes: usize,
}
