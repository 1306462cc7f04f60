pub mod builder;
pub mod config;
pub mod deployment;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod handlers;
pub mod logging;
pub mod pipeline;
pub mod storage;
pub mod sync;
pub mod transport;
pub mod webhook;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;

use pipeline::Pipeline;

pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<AppState>;
