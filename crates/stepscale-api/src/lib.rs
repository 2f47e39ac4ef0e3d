//! stepscale-api — REST API for the standalone controller.
//!
//! Exposes the embedded store so policies, target scales, and member
//! entities can be registered, plus the controller's counters.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/policies` | List all policies |
//! | POST | `/api/v1/policies` | Create or update a policy |
//! | GET | `/api/v1/policies/{ns}/{name}` | Get a policy |
//! | DELETE | `/api/v1/policies/{ns}/{name}` | Delete a policy |
//! | PUT | `/api/v1/targets/{resource}/{ns}/{name}` | Register a target scale |
//! | GET | `/api/v1/targets/{resource}/{ns}/{name}` | Get a target scale |
//! | PUT | `/api/v1/entities/{ns}/{name}` | Register a member entity |
//! | GET | `/metrics` | Prometheus exposition |
//! | GET | `/healthz` | Liveness |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, put};
use stepscale_controller::{ControllerStats, WorkQueue};
use stepscale_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub stats: Arc<ControllerStats>,
    pub queue: Arc<WorkQueue<String>>,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route(
            "/policies",
            get(handlers::list_policies).post(handlers::put_policy),
        )
        .route(
            "/policies/{ns}/{name}",
            get(handlers::get_policy).delete(handlers::delete_policy),
        )
        .route(
            "/targets/{resource}/{ns}/{name}",
            put(handlers::put_target).get(handlers::get_target),
        )
        .route("/entities/{ns}/{name}", put(handlers::put_entity))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
        .route("/healthz", get(handlers::healthz))
}
