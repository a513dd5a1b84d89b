//! REST API handlers.
//!
//! Each handler delegates to the engine and maps its outcome to JSON. Stop
//! is success-biased: nothing to stop and deferred teardown both report
//! `success: true`, since the caller's instance is (or will be) gone either
//! way.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use arena_engine::EngineError;
use arena_runtime::ContainerRuntime;

use crate::ApiState;

// ── Wire types ─────────────────────────────────────────────────

#[derive(serde::Deserialize)]
pub struct StartRequest {
    pub owner_id: u32,
    pub challenge_id: u32,
    pub host_id: String,
    pub image: String,
}

/// Stop by slot (`owner_id` + `challenge_id`) or by `instance_id`.
#[derive(serde::Deserialize)]
pub struct StopRequest {
    pub owner_id: Option<u32>,
    pub challenge_id: Option<u32>,
    pub instance_id: Option<String>,
}

#[derive(serde::Deserialize)]
pub struct StatusQuery {
    pub owner_id: u32,
    pub challenge_id: u32,
}

#[derive(serde::Serialize)]
struct StartResponse {
    success: bool,
    instance_id: String,
    address: String,
    port: u16,
}

#[derive(serde::Serialize)]
struct StopResponse {
    success: bool,
}

#[derive(serde::Serialize)]
struct StatusResponse {
    exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
}

#[derive(serde::Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

fn error_body(msg: &str, status: StatusCode) -> impl IntoResponse + use<> {
    (
        status,
        Json(ErrorResponse {
            success: false,
            error: msg.to_string(),
        }),
    )
}

fn engine_error(err: &EngineError) -> impl IntoResponse {
    let (msg, status) = if err.is_invalid_request() {
        (err.to_string(), StatusCode::BAD_REQUEST)
    } else {
        match err {
            EngineError::Runtime(e) => (
                format!("instance host did not respond, try again: {e}"),
                StatusCode::BAD_GATEWAY,
            ),
            EngineError::NoFreePort(_) => (err.to_string(), StatusCode::SERVICE_UNAVAILABLE),
            EngineError::StoppedWhileStarting { .. } => (err.to_string(), StatusCode::CONFLICT),
            _ => (err.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
        }
    };
    error_body(&msg, status)
}

// ── Hosts ──────────────────────────────────────────────────────

/// GET /api/v1/hosts
pub async fn list_hosts<R: ContainerRuntime>(
    State(state): State<ApiState<R>>,
) -> impl IntoResponse {
    Json(state.engine.list_hosts().to_vec())
}

// ── Instances ──────────────────────────────────────────────────

/// GET /api/v1/instances
pub async fn list_instances<R: ContainerRuntime>(
    State(state): State<ApiState<R>>,
) -> impl IntoResponse {
    match state.engine.list_instances() {
        Ok(records) => Json(records).into_response(),
        Err(e) => engine_error(&e).into_response(),
    }
}

/// POST /api/v1/instances/start
pub async fn start_instance<R: ContainerRuntime>(
    State(state): State<ApiState<R>>,
    Json(req): Json<StartRequest>,
) -> impl IntoResponse {
    match state
        .engine
        .start(req.owner_id, req.challenge_id, &req.host_id, &req.image)
        .await
    {
        // An existing record with no container id yet means another start
        // is still provisioning this slot; its endpoint is not known.
        Ok(info) if info.instance_id.is_empty() => error_body(
            "instance is still starting, try again shortly",
            StatusCode::CONFLICT,
        )
        .into_response(),
        Ok(info) => Json(StartResponse {
            success: true,
            instance_id: info.instance_id,
            address: info.address,
            port: info.port,
        })
        .into_response(),
        Err(e) => engine_error(&e).into_response(),
    }
}

/// POST /api/v1/instances/stop
pub async fn stop_instance<R: ContainerRuntime>(
    State(state): State<ApiState<R>>,
    Json(req): Json<StopRequest>,
) -> impl IntoResponse {
    let outcome = match (&req.instance_id, req.owner_id, req.challenge_id) {
        (Some(instance_id), _, _) => state.engine.stop_by_instance(instance_id).await,
        (None, Some(owner_id), Some(challenge_id)) => {
            state.engine.stop(owner_id, challenge_id).await
        }
        _ => {
            return error_body(
                "owner_id and challenge_id (or instance_id) required",
                StatusCode::BAD_REQUEST,
            )
            .into_response();
        }
    };
    match outcome {
        // Deferred and NoInstance are both success: the instance is gone
        // or the reaper finishes the teardown shortly.
        Ok(_) => Json(StopResponse { success: true }).into_response(),
        Err(e) => engine_error(&e).into_response(),
    }
}

/// GET /api/v1/instances/status
pub async fn instance_status<R: ContainerRuntime>(
    State(state): State<ApiState<R>>,
    Query(query): Query<StatusQuery>,
) -> impl IntoResponse {
    match state.engine.status(query.owner_id, query.challenge_id) {
        Ok(Some(info)) => Json(StatusResponse {
            exists: true,
            instance_id: Some(info.instance_id),
            address: Some(info.address),
            port: Some(info.port),
        })
        .into_response(),
        Ok(None) => Json(StatusResponse {
            exists: false,
            instance_id: None,
            address: None,
            port: None,
        })
        .into_response(),
        Err(e) => engine_error(&e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use arena_core::{HostRegistry, HostSpec, ImageSpec};
    use arena_engine::Engine;
    use arena_ledger::Ledger;
    use arena_runtime::{ContainerStatus, Provisioned, RuntimeError, RuntimeResult};

    #[derive(Clone, Default)]
    struct MockRuntime(Arc<MockInner>);

    #[derive(Default)]
    struct MockInner {
        next_id: AtomicU32,
        unreachable: AtomicBool,
    }

    impl ContainerRuntime for MockRuntime {
        async fn create(&self, _image: &str, host_port: u16) -> RuntimeResult<Provisioned> {
            if self.0.unreachable.load(Ordering::SeqCst) {
                return Err(RuntimeError::Unreachable("injected timeout".into()));
            }
            let n = self.0.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Provisioned {
                container_id: format!("ctr-{n}"),
                address: "203.0.113.7".to_string(),
                port: host_port,
            })
        }

        async fn destroy(&self, _container_id: &str) -> RuntimeResult<()> {
            Ok(())
        }

        async fn inspect(&self, _container_id: &str) -> ContainerStatus {
            ContainerStatus::Running
        }
    }

    fn test_state() -> ApiState<MockRuntime> {
        test_state_with(MockRuntime::default())
    }

    fn test_state_with(mock: MockRuntime) -> ApiState<MockRuntime> {
        let registry = HostRegistry::new(vec![HostSpec {
            id: "h1".to_string(),
            endpoint: "203.0.113.7:2375".to_string(),
            images: vec![ImageSpec {
                name: "web".to_string(),
                label: "Web".to_string(),
            }],
        }])
        .unwrap();
        let ledger = Ledger::open_in_memory().unwrap();
        let mut clients = HashMap::new();
        clients.insert("h1".to_string(), mock);
        ApiState {
            engine: Arc::new(Engine::new(registry, ledger, clients)),
        }
    }

    fn start_request(owner_id: u32, challenge_id: u32, host_id: &str, image: &str) -> StartRequest {
        StartRequest {
            owner_id,
            challenge_id,
            host_id: host_id.to_string(),
            image: image.to_string(),
        }
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn list_hosts_returns_catalog() {
        let state = test_state();
        let resp = list_hosts(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp).await;
        assert_eq!(body[0]["id"], "h1");
        assert_eq!(body[0]["images"][0]["name"], "web");
        assert_eq!(body[0]["images"][0]["label"], "Web");
    }

    #[tokio::test]
    async fn start_returns_connection_info() {
        let state = test_state();
        let resp = start_instance(State(state), Json(start_request(1, 10, "h1", "web")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["instance_id"], "ctr-1");
        assert_eq!(body["address"], "203.0.113.7");
        assert_eq!(body["port"], 40000);
    }

    #[tokio::test]
    async fn start_unknown_host_is_bad_request() {
        let state = test_state();
        let resp = start_instance(State(state), Json(start_request(1, 10, "ghost", "web")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body = body_json(resp).await;
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn start_unknown_image_is_bad_request() {
        let state = test_state();
        let resp = start_instance(State(state), Json(start_request(1, 10, "h1", "ghost")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn start_while_provisioning_is_conflict() {
        let state = test_state();
        // Another start holds the slot but has not committed yet.
        state
            .engine
            .ledger()
            .try_begin_start(1, 10, "h1", "web", 1)
            .unwrap();

        let resp = start_instance(State(state), Json(start_request(1, 10, "h1", "web")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let body = body_json(resp).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("still starting"));
    }

    #[tokio::test]
    async fn start_against_dead_host_is_bad_gateway() {
        let mock = MockRuntime::default();
        mock.0.unreachable.store(true, Ordering::SeqCst);
        let state = test_state_with(mock);

        let resp = start_instance(State(state), Json(start_request(1, 10, "h1", "web")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        let body = body_json(resp).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("try again"));
    }

    #[tokio::test]
    async fn stop_by_slot_succeeds() {
        let state = test_state();
        start_instance(State(state.clone()), Json(start_request(1, 10, "h1", "web"))).await;

        let req = StopRequest {
            owner_id: Some(1),
            challenge_id: Some(10),
            instance_id: None,
        };
        let resp = stop_instance(State(state.clone()), Json(req))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(state.engine.ledger().get(1, 10).unwrap().is_none());
    }

    #[tokio::test]
    async fn stop_by_instance_id_succeeds() {
        let state = test_state();
        start_instance(State(state.clone()), Json(start_request(1, 10, "h1", "web"))).await;

        let req = StopRequest {
            owner_id: None,
            challenge_id: None,
            instance_id: Some("ctr-1".to_string()),
        };
        let resp = stop_instance(State(state.clone()), Json(req))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(state.engine.ledger().get(1, 10).unwrap().is_none());
    }

    #[tokio::test]
    async fn stop_of_absent_instance_is_success() {
        let state = test_state();
        let req = StopRequest {
            owner_id: Some(1),
            challenge_id: Some(10),
            instance_id: None,
        };
        let resp = stop_instance(State(state), Json(req)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp).await;
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn stop_without_slot_or_id_is_bad_request() {
        let state = test_state();
        let req = StopRequest {
            owner_id: Some(1),
            challenge_id: None,
            instance_id: None,
        };
        let resp = stop_instance(State(state), Json(req)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn status_of_running_instance() {
        let state = test_state();
        start_instance(State(state.clone()), Json(start_request(1, 10, "h1", "web"))).await;

        let query = StatusQuery {
            owner_id: 1,
            challenge_id: 10,
        };
        let resp = instance_status(State(state), Query(query))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp).await;
        assert_eq!(body["exists"], true);
        assert_eq!(body["instance_id"], "ctr-1");
        assert_eq!(body["port"], 40000);
    }

    #[tokio::test]
    async fn status_of_absent_instance() {
        let state = test_state();
        let query = StatusQuery {
            owner_id: 1,
            challenge_id: 10,
        };
        let resp = instance_status(State(state), Query(query))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp).await;
        assert_eq!(body["exists"], false);
        assert!(body.get("instance_id").is_none());
    }

    #[tokio::test]
    async fn list_instances_shows_records() {
        let state = test_state();
        start_instance(State(state.clone()), Json(start_request(1, 10, "h1", "web"))).await;

        let resp = list_instances(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["owner_id"], 1);
        assert_eq!(body[0]["state"], "running");
    }
}
