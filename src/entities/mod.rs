pub mod library_snapshot;
pub mod user_service;
