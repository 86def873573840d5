use std::sync::Arc;

use pointroom_config::Settings;
use pointroom_services::{Engine, Gateway};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub gateway: Gateway,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, settings: Settings) -> Self {
        Self {
            gateway: Gateway::new(engine.clone()),
            engine,
            settings: Arc::new(settings),
        }
    }
}
