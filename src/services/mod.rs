pub mod background;
pub mod credentials;
pub mod hub;
pub mod library_cache;
pub mod library_sync;
pub mod library_view;
pub mod snapshots;
pub mod tokens;
