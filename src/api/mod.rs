pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::metrics::Metrics;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(metrics: Metrics) -> Self {
        Self { metrics }
    }
}
