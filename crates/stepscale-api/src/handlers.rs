//! REST API handlers.
//!
//! Each handler reads/writes via `StateStore` and returns JSON responses.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::info;

use stepscale_state::*;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn internal(e: StateError) -> axum::response::Response {
    error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
}

// ── Policies ───────────────────────────────────────────────────

/// GET /api/v1/policies
pub async fn list_policies(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_policies() {
        Ok(policies) => ApiResponse::ok(policies).into_response(),
        Err(e) => internal(e),
    }
}

/// GET /api/v1/policies/{ns}/{name}
pub async fn get_policy(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.store.get_policy(&ns, &name) {
        Ok(Some(policy)) => ApiResponse::ok(policy).into_response(),
        Ok(None) => error_response("policy not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => internal(e),
    }
}

/// POST /api/v1/policies
///
/// Creates or replaces the spec. A stored status is kept.
pub async fn put_policy(
    State(state): State<ApiState>,
    Json(mut policy): Json<ScalingPolicy>,
) -> impl IntoResponse {
    if let Err(msg) = check_policy(&policy) {
        return error_response(&msg, StatusCode::BAD_REQUEST).into_response();
    }
    match state.store.get_policy(&policy.namespace, &policy.name) {
        Ok(Some(existing)) => policy.status = existing.status,
        Ok(None) => {}
        Err(e) => return internal(e),
    }
    match state.store.put_policy(&policy) {
        Ok(()) => {
            info!(policy = %policy.key(), "policy stored");
            (StatusCode::CREATED, ApiResponse::ok(policy)).into_response()
        }
        Err(e) => internal(e),
    }
}

/// DELETE /api/v1/policies/{ns}/{name}
pub async fn delete_policy(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.store.delete_policy(&ns, &name) {
        Ok(true) => {
            // The next cycle for this key sees it gone and ends quietly.
            state.queue.add(format!("{ns}/{name}"));
            ApiResponse::ok("deleted").into_response()
        }
        Ok(false) => error_response("policy not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => internal(e),
    }
}

fn check_policy(policy: &ScalingPolicy) -> Result<(), String> {
    if policy.namespace.is_empty() || policy.name.is_empty() {
        return Err("namespace and name are required".to_string());
    }
    if policy.name.contains('/') || policy.namespace.contains('/') {
        return Err("namespace and name must not contain '/'".to_string());
    }
    let spec = &policy.spec;
    if spec.min_replicas > spec.max_replicas {
        return Err(format!(
            "minReplicas {} exceeds maxReplicas {}",
            spec.min_replicas, spec.max_replicas
        ));
    }
    if spec.evaluations == 0 {
        return Err("evaluations must be at least 1".to_string());
    }
    Ok(())
}

// ── Targets ────────────────────────────────────────────────────

/// Target scale registration body.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetBody {
    pub spec_replicas: u32,
    pub status_replicas: u32,
    #[serde(default)]
    pub selector: String,
}

/// PUT /api/v1/targets/{resource}/{ns}/{name}
pub async fn put_target(
    State(state): State<ApiState>,
    Path((resource, ns, name)): Path<(String, String, String)>,
    Json(body): Json<TargetBody>,
) -> impl IntoResponse {
    let scale = TargetScale {
        resource,
        namespace: ns,
        name,
        spec_replicas: body.spec_replicas,
        status_replicas: body.status_replicas,
        selector: body.selector,
    };
    match state.store.put_target(&scale) {
        Ok(()) => ApiResponse::ok(scale).into_response(),
        Err(e) => internal(e),
    }
}

/// GET /api/v1/targets/{resource}/{ns}/{name}
pub async fn get_target(
    State(state): State<ApiState>,
    Path((resource, ns, name)): Path<(String, String, String)>,
) -> impl IntoResponse {
    match state.store.get_target(&resource, &ns, &name) {
        Ok(Some(scale)) => ApiResponse::ok(scale).into_response(),
        Ok(None) => error_response("target not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => internal(e),
    }
}

// ── Entities ───────────────────────────────────────────────────

#[derive(Deserialize, Default)]
pub struct EntityBody {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// PUT /api/v1/entities/{ns}/{name}
pub async fn put_entity(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
    Json(body): Json<EntityBody>,
) -> impl IntoResponse {
    let entity = Entity {
        namespace: ns,
        name,
        labels: body.labels,
    };
    match state.store.put_entity(&entity) {
        Ok(()) => ApiResponse::ok(entity).into_response(),
        Err(e) => internal(e),
    }
}

// ── Observability ──────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let body = stepscale_controller::render_prometheus(&state.stats.snapshot(), state.queue.len());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use stepscale_controller::{ControllerStats, WorkQueue};

    fn test_state() -> ApiState {
        ApiState {
            store: StateStore::open_in_memory().unwrap(),
            stats: Arc::new(ControllerStats::new()),
            queue: Arc::new(WorkQueue::new(
                Duration::from_millis(5),
                Duration::from_secs(1000),
            )),
        }
    }

    fn test_policy(ns: &str, name: &str) -> ScalingPolicy {
        ScalingPolicy {
            namespace: ns.to_string(),
            name: name.to_string(),
            spec: PolicySpec {
                target: ScaleTarget {
                    api_version: "apps/v1".to_string(),
                    kind: "Deployment".to_string(),
                    name: name.to_string(),
                },
                label: None,
                min_replicas: 1,
                max_replicas: 10,
                scale_up_threshold: 70,
                scale_down_threshold: 20,
                evaluations: 5,
                scale_up_size: 2,
                scale_down_size: 1,
                cooldown_cycles: 3,
            },
            status: PolicyStatus::default(),
        }
    }

    #[tokio::test]
    async fn create_and_get_policy() {
        let state = test_state();
        let policy = test_policy("default", "web");

        let resp = put_policy(State(state.clone()), Json(policy)).await;
        assert_eq!(resp.into_response().status(), StatusCode::CREATED);

        let resp = get_policy(
            State(state),
            Path(("default".to_string(), "web".to_string())),
        )
        .await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn put_policy_keeps_existing_status() {
        let state = test_state();
        let mut policy = test_policy("default", "web");
        policy.status.condition = "Scaled to 3 replicas".to_string();
        state.store.put_policy(&policy).unwrap();

        let mut update = test_policy("default", "web");
        update.spec.max_replicas = 20;
        let resp = put_policy(State(state.clone()), Json(update)).await;
        assert_eq!(resp.into_response().status(), StatusCode::CREATED);

        let stored = state.store.get_policy("default", "web").unwrap().unwrap();
        assert_eq!(stored.spec.max_replicas, 20);
        assert_eq!(stored.status.condition, "Scaled to 3 replicas");
    }

    #[tokio::test]
    async fn invalid_policy_is_rejected() {
        let state = test_state();
        let mut policy = test_policy("default", "web");
        policy.spec.min_replicas = 11;
        let resp = put_policy(State(state.clone()), Json(policy)).await;
        assert_eq!(resp.into_response().status(), StatusCode::BAD_REQUEST);

        let resp = put_policy(State(state), Json(test_policy("", "web"))).await;
        assert_eq!(resp.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_policy_enqueues_key() {
        let state = test_state();
        state.store.put_policy(&test_policy("default", "web")).unwrap();

        let resp = delete_policy(
            State(state.clone()),
            Path(("default".to_string(), "web".to_string())),
        )
        .await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
        assert_eq!(state.queue.len(), 1);

        let resp = delete_policy(
            State(state),
            Path(("default".to_string(), "web".to_string())),
        )
        .await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn target_round_trips_through_store() {
        let state = test_state();
        let body = TargetBody {
            spec_replicas: 3,
            status_replicas: 2,
            selector: "app=web".to_string(),
        };
        let path = Path((
            "deployments.apps".to_string(),
            "default".to_string(),
            "web".to_string(),
        ));
        let resp = put_target(State(state.clone()), path, Json(body)).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);

        let scale = state
            .store
            .get_target("deployments.apps", "default", "web")
            .unwrap()
            .unwrap();
        assert_eq!((scale.spec_replicas, scale.status_replicas), (3, 2));
    }

    #[tokio::test]
    async fn get_missing_target() {
        let state = test_state();
        let path = Path((
            "deployments.apps".to_string(),
            "default".to_string(),
            "nope".to_string(),
        ));
        let resp = get_target(State(state), path).await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);
    }
}
