//! Shared application state for request handlers.

use std::sync::Arc;
use tera::Tera;

use crate::agents::AgentRegistry;
use crate::config::AppConfig;
use crate::rate_limit::RateLimiter;

/// Shared application state, cloneable across handlers via Arc-wrapped fields.
///
/// Holds the configuration, the Tera engine, the agent registry and, when
/// enabled, the per-client rate limiter.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub tera: Arc<Tera>,
    pub agents: Arc<AgentRegistry>,
    pub rate_limiter: Option<RateLimiter>,
}

impl AppState {
    pub fn new(config: AppConfig, tera: Tera, agents: Arc<AgentRegistry>) -> Self {
        let rate_limiter = RateLimiter::from_config(&config.rate_limit);
        Self {
            config: Arc::new(config),
            tera: Arc::new(tera),
            agents,
            rate_limiter,
        }
    }
}
