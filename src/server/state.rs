//! State shared by every request handler.

use std::sync::Arc;
use tera::Tera;

use crate::config::Config;
use crate::error::Result;
use crate::registry::StreamRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::upstream::GenerationBackend;

/// Template rendered by `GET /`.
pub(crate) const HOME_TEMPLATE: &str = "home.html";

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn GenerationBackend>,
    pub registry: StreamRegistry,
    pub templates: Arc<Tera>,
    pub config: Arc<Config>,
    pub shutdown: ShutdownCoordinator,
}

impl AppState {
    pub fn new(
        config: Config,
        backend: Arc<dyn GenerationBackend>,
        templates: Tera,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        Self {
            registry: StreamRegistry::new(config.relay.pending_ttl()),
            backend,
            templates: Arc::new(templates),
            config: Arc::new(config),
            shutdown,
        }
    }
}

/// Load page templates matching `glob`.
///
/// A missing home page is not fatal; `GET /` answers 500 until it exists.
pub fn load_templates(glob: &str) -> Result<Tera> {
    let tera = Tera::new(glob)?;

    if !tera.get_template_names().any(|name| name == HOME_TEMPLATE) {
        tracing::warn!(glob, template = HOME_TEMPLATE, "Home page template not found");
    } else {
        tracing::debug!(glob, "Templates loaded");
    }

    Ok(tera)
}
