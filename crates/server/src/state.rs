//! Application State
//!
//! Shared state across all handlers.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use parley_agent::AgentServices;
use parley_config::Settings;

use crate::handler::MessageHandler;
use crate::session::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub services: Arc<AgentServices>,
    pub registry: Arc<SessionRegistry>,
    pub handler: Arc<MessageHandler>,
    /// Present when metrics export is enabled
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(settings: Settings, services: Arc<AgentServices>) -> Self {
        let registry = Arc::new(SessionRegistry::new(&settings.server, &settings.session));
        let handler = Arc::new(MessageHandler::new(services.clone(), &settings.server));

        Self {
            settings: Arc::new(settings),
            services,
            registry,
            handler,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
