use std::sync::Arc;

use crate::services::hub::LibraryHub;

pub struct AppState {
    pub hub: Arc<LibraryHub>,
    /// How old a cached library may be before a read triggers a refresh.
    pub staleness_window: chrono::Duration,
}
