use crate::handlers::*;
use crate::AppState;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Extender server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to listen on
    pub listen_addr: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8888)),
        }
    }
}

/// HTTP endpoint the host scheduler calls for filter and prioritize
pub struct ExtenderServer {
    config: Config,
    state: Arc<AppState>,
}

impl ExtenderServer {
    /// Create a new extender server
    pub fn new(config: Config, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Build the router
    pub fn build_router(&self) -> Router {
        Router::new()
            // Health checks
            .route("/healthz", get(healthz))
            .route("/livez", get(livez))
            .route("/readyz", get(readyz))
            // Extender verbs
            .route("/filter", post(filter))
            .route("/prioritize", post(prioritize))
            // Add tracing and state
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve until the token is cancelled
    pub async fn run(self, token: CancellationToken) -> Result<(), std::io::Error> {
        let app = self.build_router();

        info!("Starting scheduler extender on {}", self.config.listen_addr);

        let listener = TcpListener::bind(self.config.listen_addr).await?;

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                token.cancelled().await;
                info!("Scheduler extender shutting down");
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use ballast_core::mock::{bound_to, make_node, pod_owned_by, FakeCluster};
    use ballast_scheduler::{DecisionEngine, EngineConfig};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn router() -> (Arc<FakeCluster>, Router) {
        let cluster = Arc::new(FakeCluster::new());
        let engine = Arc::new(DecisionEngine::new(cluster.clone(), EngineConfig::default()));
        let server = ExtenderServer::new(Config::default(), Arc::new(AppState::new(engine)));
        (cluster, server.build_router())
    }

    async fn post_json(router: Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let resp = router.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn args(pod: &ballast_core::Pod, nodes: Vec<ballast_core::Node>) -> Value {
        json!({
            "Pod": pod,
            "Nodes": { "items": nodes },
        })
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen_addr.to_string(), "0.0.0.0:8888");
    }

    #[tokio::test]
    async fn test_healthz() {
        let (_cluster, router) = router().await;
        let req = Request::builder()
            .uri("/healthz")
            .body(Body::empty())
            .unwrap();

        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_filter_single_replica_pod() {
        let (cluster, router) = router().await;
        cluster.add_stateful_set("default", "db", 1).await;
        let pod = pod_owned_by("db-0", "default", "StatefulSet", "db");
        let nodes = vec![
            make_node("spot-1", Some("spot"), true),
            make_node("od-1", Some("on-demand"), true),
        ];

        let (status, body) = post_json(router, "/filter", args(&pod, nodes)).await;

        assert_eq!(status, StatusCode::OK);
        let items = body["Nodes"]["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["metadata"]["name"], "od-1");
        assert!(body["FailedNodes"]["spot-1"].is_string());
        assert_eq!(body["Error"], "");
    }

    #[tokio::test]
    async fn test_filter_by_node_names() {
        let (cluster, router) = router().await;
        cluster.add_stateful_set("default", "web", 3).await;
        cluster.add_node(make_node("spot-1", Some("spot"), true)).await;
        cluster.add_node(make_node("od-1", Some("on-demand"), false)).await;
        let pod = pod_owned_by("web-0", "default", "StatefulSet", "web");

        let (status, body) = post_json(
            router,
            "/filter",
            json!({ "Pod": pod, "NodeNames": ["spot-1", "od-1", "ghost"] }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["NodeNames"], json!(["spot-1"]));
        assert!(body["FailedNodes"]["od-1"].is_string());
        assert!(body["FailedNodes"]["ghost"].is_string());
        assert!(body.get("Nodes").is_none());
    }

    #[tokio::test]
    async fn test_filter_contract_error_sets_error_field() {
        let (_cluster, router) = router().await;
        let mut pod = pod_owned_by("web-0", "default", "StatefulSet", "web");
        pod.metadata.name = None;

        let (status, body) = post_json(
            router,
            "/filter",
            args(&pod, vec![make_node("spot-1", Some("spot"), true)]),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_ne!(body["Error"], "");
        assert!(body.get("Nodes").is_none());
    }

    #[tokio::test]
    async fn test_filter_without_candidates_sets_error_field() {
        let (_cluster, router) = router().await;
        let pod = pod_owned_by("web-0", "default", "StatefulSet", "web");

        let (status, body) = post_json(router, "/filter", json!({ "Pod": pod })).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["Error"].as_str().unwrap().contains("NodeNames"));
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let (_cluster, router) = router().await;
        let req = Request::builder()
            .method("POST")
            .uri("/filter")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_prioritize_scores() {
        let (cluster, router) = router().await;
        cluster.add_stateful_set("default", "web", 3).await;
        cluster
            .add_pod(bound_to(
                pod_owned_by("web-0", "default", "StatefulSet", "web"),
                "od-1",
            ))
            .await;
        let pod = pod_owned_by("web-1", "default", "StatefulSet", "web");
        let nodes = vec![
            make_node("spot-1", Some("spot"), true),
            make_node("od-1", Some("on-demand"), true),
            make_node("od-2", Some("on-demand"), true),
        ];

        let (status, body) = post_json(router, "/prioritize", args(&pod, nodes)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!([
                { "Host": "spot-1", "Score": 0 },
                { "Host": "od-1", "Score": 9 },
                { "Host": "od-2", "Score": 10 },
            ])
        );
    }

    #[tokio::test]
    async fn test_prioritize_contract_error_is_status() {
        let (_cluster, router) = router().await;
        let pod = pod_owned_by("web-1", "default", "StatefulSet", "web");
        let mut unnamed = make_node("x", Some("spot"), true);
        unnamed.metadata.name = Some(String::new());

        let (status, body) = post_json(router, "/prioritize", args(&pod, vec![unnamed])).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "Status");
        assert_eq!(body["code"], 400);
    }
}
