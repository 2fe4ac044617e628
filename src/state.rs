use crate::config::settings::{AppConfig, Credentials};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    /// Used when the platform does not inject credentials per request.
    pub fallback_credentials: Credentials,
}

impl AppState {
    pub fn new(config: AppConfig, fallback_credentials: Credentials) -> Self {
        Self {
            config,
            fallback_credentials,
        }
    }
}
