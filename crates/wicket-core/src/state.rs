use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{any, get};

use wicket_common::Config;
use wicket_transport::{TransportError, TransportSelector};

use crate::engine::EngineSettings;
use crate::handler::{landing, probe, proxy_handler};
use crate::routes::RouteTable;

pub struct AppState {
    pub config: Arc<Config>,
    pub routes: RouteTable,
    pub selector: Arc<TransportSelector>,
    pub engine_settings: Arc<EngineSettings>,
}

impl AppState {
    pub fn from_config(config: Config) -> Result<Self, TransportError> {
        let selector = TransportSelector::new(config.aggressive_fallback)?;
        let routes = RouteTable::builtin(&config);
        let engine_settings = EngineSettings::from_config(&config);
        Ok(Self {
            config: Arc::new(config),
            routes,
            selector: Arc::new(selector),
            engine_settings: Arc::new(engine_settings),
        })
    }
}

pub struct Core {
    state: Arc<AppState>,
}

impl Core {
    pub fn new(config: Config) -> Result<Self, TransportError> {
        Ok(Self {
            state: Arc::new(AppState::from_config(config)?),
        })
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(landing))
            .route("/test", any(probe))
            .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
            .route("/{*path}", any(proxy_handler))
            .with_state(self.state.clone())
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }
}
