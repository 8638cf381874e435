pub mod library;
pub mod provider_auth;
