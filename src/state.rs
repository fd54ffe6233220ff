//! Shared server state handed to every request handler.

use crate::mapping::Mapping;
use crate::reqlog::RequestLog;
use crate::scenario::ScenarioEngine;
use crate::settings::Settings;
use crate::store::MappingStore;
use crate::template::TemplateEngine;
use std::sync::Arc;
use std::sync::RwLock;

/// Everything a request handler needs, cloned cheaply (everything inside is
/// already an `Arc` or internally synchronized).
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MappingStore>,
    pub scenarios: Arc<ScenarioEngine>,
    pub log: Arc<RequestLog>,
    pub templates: Arc<TemplateEngine>,
    pub http_client: reqwest::Client,
    pub settings: Arc<RwLock<Settings>>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let log = RequestLog::new(settings.request_log_capacity);
        Self {
            store: Arc::new(MappingStore::new()),
            scenarios: Arc::new(ScenarioEngine::new()),
            log: Arc::new(log),
            templates: Arc::new(TemplateEngine::new()),
            http_client: reqwest::Client::new(),
            settings: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn settings(&self) -> Settings {
        self.settings.read().unwrap().clone()
    }

    /// Load one static mapping, used both at startup and by the
    /// `--watch-static-mappings` rescan loop. Replaces an existing mapping
    /// with the same id rather than erroring. Idempotent as long as the
    /// mapping's id is stable across calls (the static-mapping-dir loader
    /// derives one from the file path when the file doesn't set its own).
    pub fn load_static_mapping(&self, mapping: Mapping) {
        if self.store.get(mapping.id).is_some() {
            let _ = self.store.update(mapping);
        } else {
            let _ = self.store.add(mapping);
        }
    }
}
