use std::sync::Arc;

use crate::config::Config;
use crate::observability::Metrics;
use crate::tasks::TaskRunner;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub runner: TaskRunner,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(config: Arc<Config>, runner: TaskRunner, metrics: Arc<Metrics>) -> Self {
        Self {
            config,
            runner,
            metrics,
        }
    }
}
