//! Standalone tests.
//!
//! Drives the API router the daemon serves, and a full controller wired to
//! the same store, the way `stepscaled run` assembles them.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tokio::sync::watch;
use tower::ServiceExt;

use stepscale_api::{ApiState, build_router};
use stepscale_autoscale::{ReplicaCalculator, ScalingHistoryCache};
use stepscale_controller::{
    Controller, ControllerSettings, Reconciler, StaticResourceMapper, WorkQueue,
};
use stepscale_metrics::{MetricsWindowCache, StaticMetricsSource};
use stepscale_state::StateStore;

struct Stack {
    store: StateStore,
    source: Arc<StaticMetricsSource>,
    controller: Arc<Controller>,
    router: Router,
}

fn stack() -> Stack {
    let store = StateStore::open_in_memory().unwrap();
    let source = Arc::new(StaticMetricsSource::new());
    let window = Arc::new(MetricsWindowCache::new(15, Duration::from_secs(900)));
    let history = Arc::new(ScalingHistoryCache::new(15, Duration::from_secs(900)));
    let reconciler = Reconciler::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(StaticResourceMapper::new()),
        ReplicaCalculator::new(source.clone(), Arc::new(store.clone()), window),
        history,
    );
    let queue = Arc::new(WorkQueue::new(
        Duration::from_millis(5),
        Duration::from_secs(1000),
    ));
    let controller = Arc::new(Controller::new(
        reconciler,
        Arc::new(store.clone()),
        Arc::clone(&queue),
        ControllerSettings {
            workers: 2,
            resync_interval: Duration::from_millis(25),
            gc_interval: Duration::from_secs(60),
        },
    ));
    let router = build_router(ApiState {
        store: store.clone(),
        stats: Arc::clone(controller.stats()),
        queue,
    });
    Stack {
        store,
        source,
        controller,
        router,
    }
}

fn policy_json(cooldown: u32) -> Value {
    json!({
        "namespace": "default",
        "name": "web",
        "spec": {
            "target": {"apiVersion": "apps/v1", "kind": "Deployment", "name": "web"},
            "minReplicas": 1,
            "maxReplicas": 10,
            "scaleUpThreshold": 70,
            "scaleDownThreshold": 20,
            "evaluations": 3,
            "scaleUpSize": 2,
            "scaleDownSize": 1,
            "cooldownCycles": cooldown
        }
    })
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(v) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&v).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn spec_replicas(router: &Router) -> u64 {
    let (status, body) = send(router, "GET", "/api/v1/targets/deployments.apps/default/web", None).await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_slice(&body).unwrap();
    v["data"]["specReplicas"].as_u64().unwrap()
}

#[tokio::test]
async fn standalone_api_list_policies_empty() {
    let s = stack();
    let (status, body) = send(&s.router, "GET", "/api/v1/policies", None).await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["data"], json!([]));
}

#[tokio::test]
async fn standalone_api_create_and_get_policy() {
    let s = stack();
    let (status, _) = send(&s.router, "POST", "/api/v1/policies", Some(policy_json(3))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&s.router, "GET", "/api/v1/policies/default/web", None).await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["data"]["spec"]["cooldownCycles"], 3);

    let (status, _) = send(&s.router, "GET", "/api/v1/policies/default/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn standalone_api_registers_targets_and_entities() {
    let s = stack();
    let (status, _) = send(
        &s.router,
        "PUT",
        "/api/v1/targets/deployments.apps/default/web",
        Some(json!({"specReplicas": 2, "statusReplicas": 2, "selector": "app=web"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(spec_replicas(&s.router).await, 2);

    let (status, _) = send(
        &s.router,
        "PUT",
        "/api/v1/entities/default/web-1",
        Some(json!({"labels": {"app": "web"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(s.store.list_entities("default").unwrap().len(), 1);
}

#[tokio::test]
async fn standalone_health_and_metrics_endpoints() {
    let s = stack();
    let (status, body) = send(&s.router, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");

    let (status, body) = send(&s.router, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("stepscale_reconciles_total 0"));
    assert!(text.contains("stepscale_queue_depth 0"));
}

#[tokio::test]
async fn standalone_controller_scales_hot_target() {
    let s = stack();
    send(
        &s.router,
        "PUT",
        "/api/v1/targets/deployments.apps/default/web",
        Some(json!({"specReplicas": 2, "statusReplicas": 2, "selector": "app=web"})),
    )
    .await;
    send(
        &s.router,
        "PUT",
        "/api/v1/entities/default/web-1",
        Some(json!({"labels": {"app": "web"}})),
    )
    .await;
    s.source.set_values("default", "web-1", 1_700_000_000, &[85, 90, 95]);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(Arc::clone(&s.controller).run(s.store.subscribe(), shutdown_rx));

    // Zero cooldown: the first cycle may act.
    send(&s.router, "POST", "/api/v1/policies", Some(policy_json(0))).await;

    // Counters are recorded after the cycle's writes complete.
    let scaled = tokio::time::timeout(Duration::from_secs(5), async {
        while s.controller.stats().snapshot().rescales == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(scaled.is_ok(), "target was not scaled up");
    assert_eq!(spec_replicas(&s.router).await, 4);

    let (_, body) = send(&s.router, "GET", "/api/v1/policies/default/web", None).await;
    let v: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(v["data"]["status"]["condition"], "Scaled to 4 replicas");

    let (_, body) = send(&s.router, "GET", "/metrics", None).await;
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("stepscale_rescales_total 1"));

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("controller did not stop")
        .unwrap();
}

#[tokio::test]
async fn standalone_controller_leaves_disabled_target_alone() {
    let s = stack();
    send(
        &s.router,
        "PUT",
        "/api/v1/targets/deployments.apps/default/web",
        Some(json!({"specReplicas": 0, "statusReplicas": 0, "selector": "app=web"})),
    )
    .await;
    send(&s.router, "POST", "/api/v1/policies", Some(policy_json(0))).await;

    s.controller.resync().await.unwrap();
    assert!(s.controller.process_next().await);

    assert_eq!(spec_replicas(&s.router).await, 0);
    assert_eq!(s.controller.stats().snapshot().rescales, 0);
}
