//! arena-api — REST surface for the arena orchestrator.
//!
//! Thin axum layer over [`arena_engine::Engine`]: request parsing, response
//! shaping, and status-code mapping live here; every decision about
//! instances lives in the engine.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/hosts` | Host catalog with offered images |
//! | GET | `/api/v1/instances` | Admin listing of all instance records |
//! | POST | `/api/v1/instances/start` | Start (or reuse) an instance |
//! | POST | `/api/v1/instances/stop` | Stop an instance |
//! | GET | `/api/v1/instances/status` | Connection info for a running instance |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use arena_engine::Engine;
use arena_runtime::ContainerRuntime;

/// Shared state for API handlers.
pub struct ApiState<R: ContainerRuntime> {
    pub engine: Arc<Engine<R>>,
}

// Manual impl: the engine is behind an Arc, so `R: Clone` is not needed.
impl<R: ContainerRuntime> Clone for ApiState<R> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

/// Build the complete API router.
pub fn build_router<R: ContainerRuntime>(engine: Arc<Engine<R>>) -> Router {
    let state = ApiState { engine };

    let api_routes = Router::new()
        .route("/hosts", get(handlers::list_hosts::<R>))
        .route("/instances", get(handlers::list_instances::<R>))
        .route("/instances/start", post(handlers::start_instance::<R>))
        .route("/instances/stop", post(handlers::stop_instance::<R>))
        .route("/instances/status", get(handlers::instance_status::<R>))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
