//! HTTP 接口 - actuator 风格的健康检查与实例信息
//!
//! - `GET /actuator/health`：运行中返回 200 `UP`，否则 503
//! - `GET /actuator/info`：服务名、版本、实例 ID、注册中心、启动时间

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::service::lifecycle::LifecycleState;

/// HTTP 层共享状态
#[derive(Debug, Clone)]
pub struct HttpState {
    pub service_name: String,
    pub version: String,
    pub instance_id: Option<String>,
    pub registry: Option<&'static str>,
    pub started_at: DateTime<Utc>,
    pub lifecycle: watch::Receiver<LifecycleState>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    components: HealthComponents,
}

#[derive(Debug, Serialize)]
struct HealthComponents {
    lifecycle: ComponentStatus,
    discovery: ComponentStatus,
}

#[derive(Debug, Serialize)]
struct ComponentStatus {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InfoResponse {
    app: AppInfo,
    instance: InstanceInfo,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct AppInfo {
    name: String,
    version: String,
}

#[derive(Debug, Serialize)]
struct InstanceInfo {
    id: Option<String>,
    registry: Option<&'static str>,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/actuator/health", get(health))
        .route("/actuator/info", get(info))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

async fn health(State(state): State<Arc<HttpState>>) -> (StatusCode, Json<HealthResponse>) {
    let lifecycle = *state.lifecycle.borrow();
    let up = lifecycle == LifecycleState::Running;

    let discovery = match (state.registry, &state.instance_id) {
        (Some(registry), Some(instance_id)) => ComponentStatus {
            status: "UP",
            details: Some(format!("{registry}:{instance_id}")),
        },
        _ => ComponentStatus {
            status: "UNKNOWN",
            details: Some("not registered".to_string()),
        },
    };

    let body = HealthResponse {
        status: if up { "UP" } else { "OUT_OF_SERVICE" },
        components: HealthComponents {
            lifecycle: ComponentStatus {
                status: if up { "UP" } else { "DOWN" },
                details: Some(lifecycle.to_string()),
            },
            discovery,
        },
    };

    let code = if up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}

async fn info(State(state): State<Arc<HttpState>>) -> Json<InfoResponse> {
    Json(InfoResponse {
        app: AppInfo {
            name: state.service_name.clone(),
            version: state.version.clone(),
        },
        instance: InstanceInfo {
            id: state.instance_id.clone(),
            registry: state.registry,
        },
        started_at: state.started_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::service::lifecycle::Lifecycle;

    fn state(lifecycle: &Lifecycle) -> HttpState {
        HttpState {
            service_name: "customers-service".to_string(),
            version: "0.1.0".to_string(),
            instance_id: Some("customers-1".to_string()),
            registry: Some("memory"),
            started_at: Utc::now(),
            lifecycle: lifecycle.subscribe(),
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_tracks_lifecycle() {
        let lifecycle = Lifecycle::new();
        let app = router(state(&lifecycle));

        let (status, body) = get_json(app.clone(), "/actuator/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "OUT_OF_SERVICE");

        lifecycle.mark_running();
        let (status, body) = get_json(app, "/actuator/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "UP");
        assert_eq!(body["components"]["discovery"]["details"], "memory:customers-1");
    }

    #[tokio::test]
    async fn test_info() {
        let lifecycle = Lifecycle::new();
        let (status, body) = get_json(router(state(&lifecycle)), "/actuator/info").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["app"]["name"], "customers-service");
        assert_eq!(body["instance"]["id"], "customers-1");
        assert!(body["startedAt"].is_string());
    }
}
