use std::sync::Arc;

pub mod handlers;
pub mod middleware;
pub mod router;
pub mod types;

pub use router::create_router;
pub use types::*;

use crate::config::GatewayConfig;
use crate::gateway::Gateway;
use crate::ratelimit::RequestRateLimiter;

pub struct ApiState {
    pub gateway: Gateway,
    pub config: Arc<GatewayConfig>,
    pub limiter: Arc<RequestRateLimiter>,
}

impl ApiState {
    pub fn new(gateway: Gateway, config: GatewayConfig) -> Self {
        let limiter = RequestRateLimiter::new(config.rate_limit_requests, config.rate_limit_period());
        Self {
            gateway,
            config: Arc::new(config),
            limiter: Arc::new(limiter),
        }
    }
}
