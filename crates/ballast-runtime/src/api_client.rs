use crate::error::{Result as RuntimeResult, RuntimeError};
use async_trait::async_trait;
use ballast_core::{
    from_value, BallastError, ClusterReader, EvictionOutcome, ObjectMeta, PodEvictor, Result,
};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::api::policy::v1::{Eviction, PodDisruptionBudget};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Where the in-cluster service account credentials are mounted
const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Connection settings for the Kubernetes API server
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// API server base URL, e.g. `https://10.0.0.1:443`
    pub base_url: String,
    /// Bearer token sent with every request
    pub token: Option<String>,
    /// PEM bundle used to verify the API server certificate
    pub ca_cert_pem: Option<Vec<u8>>,
    /// Deadline for non-watch requests
    pub request_timeout: Duration,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8001".to_string(),
            token: None,
            ca_cert_pem: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl ApiClientConfig {
    /// Configuration from the pod's service account and the
    /// `KUBERNETES_SERVICE_HOST`/`KUBERNETES_SERVICE_PORT` environment
    pub fn in_cluster() -> RuntimeResult<Self> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
            RuntimeError::invalid_config(
                "KUBERNETES_SERVICE_HOST is not set",
                "Run inside a pod, or pass --api-url explicitly",
            )
        })?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());

        // IPv6 service hosts need brackets
        let base_url = if host.contains(':') {
            format!("https://[{}]:{}", host, port)
        } else {
            format!("https://{}:{}", host, port)
        };

        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        Self::from_files(&base_url, Some(&dir.join("token")), Some(&dir.join("ca.crt")))
    }

    /// Configuration from an explicit URL and optional token/CA files
    pub fn from_files(
        base_url: &str,
        token_file: Option<&Path>,
        ca_file: Option<&Path>,
    ) -> RuntimeResult<Self> {
        let token = token_file
            .map(read_file)
            .transpose()?
            .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string());
        let ca_cert_pem = ca_file.map(read_file).transpose()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            ca_cert_pem,
            ..Default::default()
        })
    }
}

fn read_file(path: &Path) -> RuntimeResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        RuntimeError::invalid_config(
            format!("Failed to read {}: {}", path.display(), e),
            "Check that the file exists and is readable by the ballast process",
        )
    })
}

/// Lightweight HTTP client for the Kubernetes API server
pub struct ApiClient {
    base_url: String,
    client: Client,
    token: Option<String>,
    request_timeout: Duration,
}

impl ApiClient {
    pub fn new(config: ApiClientConfig) -> RuntimeResult<Self> {
        let mut builder = Client::builder();
        if let Some(pem) = &config.ca_cert_pem {
            let cert = reqwest::Certificate::from_pem(pem).map_err(|e| {
                RuntimeError::invalid_config(
                    format!("Invalid CA bundle: {}", e),
                    "The CA file must contain PEM encoded certificates",
                )
            })?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder.build().map_err(|e| {
            RuntimeError::internal_error(format!("Failed to build HTTP client: {}", e))
        })?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            token: config.token,
            request_timeout: config.request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| BallastError::cluster_unavailable(format!("HTTP request failed: {}", e)))
    }

    /// GET a single object
    async fn get_object<T: DeserializeOwned>(&self, path: &str, resource_key: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let resp = self
            .send(self.client.get(&url).timeout(self.request_timeout))
            .await?;

        if !resp.status().is_success() {
            return Err(status_error(resp, resource_key).await);
        }

        let body: serde_json::Value = resp.json().await.map_err(|e| {
            BallastError::cluster_unavailable(format!("Failed to read {}: {}", resource_key, e))
        })?;
        from_value(body)
    }

    /// GET a list and parse its `items`, skipping entries that fail to parse
    async fn list_objects<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<(Vec<T>, Option<String>)> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {} {:?}", url, query);

        let resp = self
            .send(
                self.client
                    .get(&url)
                    .query(query)
                    .timeout(self.request_timeout),
            )
            .await?;

        if !resp.status().is_success() {
            return Err(status_error(resp, path).await);
        }

        let body: serde_json::Value = resp.json().await.map_err(|e| {
            BallastError::cluster_unavailable(format!("Failed to read list {}: {}", path, e))
        })?;

        let resource_version = body["metadata"]["resourceVersion"]
            .as_str()
            .map(str::to_string);
        let items = body["items"].as_array().cloned().unwrap_or_default();

        let mut objects = Vec::with_capacity(items.len());
        for item in items {
            match from_value(item) {
                Ok(object) => objects.push(object),
                Err(e) => warn!("Failed to parse item from {}: {}", path, e),
            }
        }

        Ok((objects, resource_version))
    }

    /// GET /api/v1/nodes, returning the list's resourceVersion for watching
    pub async fn list_nodes(&self) -> Result<(Vec<Node>, Option<String>)> {
        self.list_objects("/api/v1/nodes", &[]).await
    }

    /// Open a node watch from `resource_version`. The response body is a
    /// stream of newline-delimited watch events.
    pub async fn watch_nodes(&self, resource_version: &str, timeout_seconds: u64) -> Result<Response> {
        let url = format!("{}/api/v1/nodes", self.base_url);
        debug!("WATCH {} from resourceVersion {}", url, resource_version);

        let resp = self
            .send(self.client.get(&url).query(&[
                ("watch", "true".to_string()),
                ("resourceVersion", resource_version.to_string()),
                ("allowWatchBookmarks", "true".to_string()),
                ("timeoutSeconds", timeout_seconds.to_string()),
            ]))
            .await?;

        if !resp.status().is_success() {
            return Err(status_error(resp, "Node watch").await);
        }

        Ok(resp)
    }
}

/// Map a non-success response onto the error taxonomy callers branch on
async fn status_error(resp: Response, resource_key: &str) -> BallastError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();

    match status {
        StatusCode::NOT_FOUND => BallastError::resource_not_found(resource_key),
        // Rate limiting; budget rejections are only mapped by the eviction call
        StatusCode::TOO_MANY_REQUESTS => BallastError::cluster_unavailable(format!(
            "{} throttled by the API server",
            resource_key
        )),
        s if s.is_server_error() => BallastError::cluster_unavailable(format!(
            "{} returned {}: {}",
            resource_key, status, body
        )),
        _ => BallastError::internal_error(format!(
            "{} returned {}: {}",
            resource_key, status, body
        )),
    }
}

#[async_trait]
impl ClusterReader for ApiClient {
    async fn get_replica_set(&self, namespace: &str, name: &str) -> Result<ReplicaSet> {
        self.get_object(
            &format!("/apis/apps/v1/namespaces/{}/replicasets/{}", namespace, name),
            &format!("ReplicaSet/{}/{}", namespace, name),
        )
        .await
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        self.get_object(
            &format!("/apis/apps/v1/namespaces/{}/deployments/{}", namespace, name),
            &format!("Deployment/{}/{}", namespace, name),
        )
        .await
    }

    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<StatefulSet> {
        self.get_object(
            &format!("/apis/apps/v1/namespaces/{}/statefulsets/{}", namespace, name),
            &format!("StatefulSet/{}/{}", namespace, name),
        )
        .await
    }

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<DaemonSet> {
        self.get_object(
            &format!("/apis/apps/v1/namespaces/{}/daemonsets/{}", namespace, name),
            &format!("DaemonSet/{}/{}", namespace, name),
        )
        .await
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        self.get_object(&format!("/api/v1/nodes/{}", name), &format!("Node/{}", name))
            .await
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>> {
        let (pods, _) = self
            .list_objects(
                "/api/v1/pods",
                &[("fieldSelector", format!("spec.nodeName={}", node_name))],
            )
            .await?;
        Ok(pods)
    }

    async fn list_pods(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>> {
        let path = format!("/api/v1/namespaces/{}/pods", namespace);
        let query = if labels.is_empty() {
            Vec::new()
        } else {
            vec![(
                "labelSelector",
                ballast_core::labels::to_selector_string(labels),
            )]
        };
        let (pods, _) = self.list_objects(&path, &query).await?;
        Ok(pods)
    }

    async fn list_disruption_budgets(&self, namespace: &str) -> Result<Vec<PodDisruptionBudget>> {
        let path = format!("/apis/policy/v1/namespaces/{}/poddisruptionbudgets", namespace);
        let (budgets, _) = self.list_objects(&path, &[]).await?;
        Ok(budgets)
    }
}

#[async_trait]
impl PodEvictor for ApiClient {
    /// POST /api/v1/namespaces/{namespace}/pods/{name}/eviction
    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<EvictionOutcome> {
        let url = format!(
            "{}/api/v1/namespaces/{}/pods/{}/eviction",
            self.base_url, namespace, name
        );
        debug!("POST {}", url);

        let eviction = Eviction {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            delete_options: None,
        };

        let resp = self
            .send(
                self.client
                    .post(&url)
                    .json(&eviction)
                    .timeout(self.request_timeout),
            )
            .await?;

        let pod = format!("{}/{}", namespace, name);
        match resp.status() {
            s if s.is_success() => Ok(EvictionOutcome::Evicted),
            StatusCode::NOT_FOUND => Ok(EvictionOutcome::AlreadyGone),
            StatusCode::TOO_MANY_REQUESTS => Err(BallastError::disruption_budget_exceeded(pod)),
            _ => Err(status_error(resp, &pod).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ApiClient {
        ApiClient::new(ApiClientConfig {
            base_url: server.uri(),
            token: Some("abc".to_string()),
            ..Default::default()
        })
        .unwrap()
    }

    async fn mount_eviction(server: &MockServer, pod: &str, status: u16) {
        Mock::given(method("POST"))
            .and(path(format!("/api/v1/namespaces/default/pods/{}/eviction", pod)))
            .respond_with(ResponseTemplate::new(status))
            .mount(server)
            .await;
    }

    #[test]
    fn test_from_files_trims_token() {
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("token");
        let mut file = std::fs::File::create(&token_path).unwrap();
        writeln!(file, "abc.def.ghi").unwrap();

        let config =
            ApiClientConfig::from_files("https://10.0.0.1:443/", Some(&token_path), None).unwrap();

        assert_eq!(config.base_url, "https://10.0.0.1:443");
        assert_eq!(config.token.as_deref(), Some("abc.def.ghi"));
        assert!(config.ca_cert_pem.is_none());
    }

    #[test]
    fn test_missing_token_file_is_config_error() {
        let result = ApiClientConfig::from_files(
            "https://10.0.0.1:443",
            Some(Path::new("/nonexistent/ballast/token")),
            None,
        );
        assert!(matches!(result, Err(RuntimeError::InvalidConfig { .. })));
    }

    #[test]
    fn test_client_without_tls_settings() {
        let client = ApiClient::new(ApiClientConfig::default()).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:8001");
    }

    #[tokio::test]
    async fn test_eviction_status_mapping() {
        let server = MockServer::start().await;
        mount_eviction(&server, "accepted", 201).await;
        mount_eviction(&server, "gone", 404).await;
        mount_eviction(&server, "guarded", 429).await;
        mount_eviction(&server, "flaky", 503).await;
        let client = client_for(&server);

        assert_eq!(
            client.evict_pod("default", "accepted").await.unwrap(),
            EvictionOutcome::Evicted
        );
        assert_eq!(
            client.evict_pod("default", "gone").await.unwrap(),
            EvictionOutcome::AlreadyGone
        );

        let err = client.evict_pod("default", "guarded").await.unwrap_err();
        assert!(matches!(err, BallastError::DisruptionBudgetExceeded { .. }));
        assert!(err.is_transient());

        let err = client.evict_pod("default", "flaky").await.unwrap_err();
        assert!(matches!(err, BallastError::ClusterUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_read_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/nodes/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/nodes/throttled"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/nodes/forbidden"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        let client = client_for(&server);

        assert!(client.get_node("missing").await.unwrap_err().is_not_found());

        // Throttling on reads is not a budget rejection
        let err = client.get_node("throttled").await.unwrap_err();
        assert!(matches!(err, BallastError::ClusterUnavailable { .. }));

        let err = client.get_node("forbidden").await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_list_pods_on_node_sends_selector_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/pods"))
            .and(query_param("fieldSelector", "spec.nodeName=spot-1"))
            .and(header("authorization", "Bearer abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "kind": "PodList",
                "apiVersion": "v1",
                "metadata": { "resourceVersion": "7" },
                "items": [
                    { "metadata": { "name": "web-0", "namespace": "default" } },
                    { "metadata": 5 }
                ]
            })))
            .mount(&server)
            .await;
        let client = client_for(&server);

        let pods = client.list_pods_on_node("spot-1").await.unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].metadata.name.as_deref(), Some("web-0"));
    }
}
