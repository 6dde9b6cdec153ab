use crate::handlers::{events, health_check, list_engines, profiles, AppState};
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct ApiServer {
    host: String,
    port: u16,
    cors_enabled: bool,
    state: AppState,
}

/// Every route of the API
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/engines", get(list_engines))
        .route(
            "/api/profiles",
            get(profiles::list_profiles).post(profiles::create_profile),
        )
        .route("/api/profiles/validate", post(profiles::validate_profile))
        .route("/api/profiles/fix", post(profiles::fix_profile))
        .route(
            "/api/profiles/{id}",
            get(profiles::get_profile)
                .put(profiles::update_profile)
                .delete(profiles::delete_profile),
        )
        .route("/api/profiles/{id}/readiness", get(profiles::get_readiness))
        .route("/api/profiles/{id}/events", get(events::stream_events))
        .with_state(state)
}

impl ApiServer {
    pub fn new(host: String, port: u16, cors_enabled: bool, state: AppState) -> Self {
        Self {
            host,
            port,
            cors_enabled,
            state,
        }
    }

    /// Serve until `shutdown` resolves
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let mut app = router(self.state).layer(TraceLayer::new_for_http());

        if self.cors_enabled {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);

            app = app.layer(cors);
        }

        let addr = format!("{}:{}", self.host, self.port);
        info!("Starting API server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("API server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use cdc_core::{
        BrokerSubscriber, CapabilityHandler, CaptureGateway, CaptureJobConfig, ConnectionProfile,
        ConnectorLifecycleManager, DeliverySink, EngineType, Error, ProfileStore, RawMessage,
        RegistrationFailure, RelayConfig, Registry, Result, StreamRelay, Subscription,
        ValidationReport, ValidationStep,
    };
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    struct StubHandler {
        ready: bool,
    }

    #[async_trait]
    impl CapabilityHandler for StubHandler {
        fn engine(&self) -> EngineType {
            EngineType::Postgres
        }

        async fn validate(&self, _profile: &ConnectionProfile) -> ValidationReport {
            let wal = if self.ready {
                ValidationStep::success("wal_level", "wal_level is 'logical'")
            } else {
                ValidationStep::error("wal_level", "wal_level is 'replica', must be 'logical'")
            };
            ValidationReport::from_steps(vec![ValidationStep::success("connectivity", "ok"), wal])
        }

        async fn fix(&self, profile: &ConnectionProfile) -> ValidationReport {
            self.validate(profile).await
        }

        async fn prepare_for_connector(&self, _profile: &ConnectionProfile) -> Result<()> {
            Ok(())
        }

        fn capture_config(&self, _profile: &ConnectionProfile) -> CaptureJobConfig {
            CaptureJobConfig::new()
        }
    }

    #[derive(Default)]
    struct StubGateway {
        jobs: Mutex<HashMap<String, CaptureJobConfig>>,
        reject: bool,
    }

    #[async_trait]
    impl CaptureGateway for StubGateway {
        async fn get_job(&self, name: &str) -> Result<Option<Value>> {
            Ok(self.jobs.lock().unwrap().get(name).map(|_| json!({ "name": name })))
        }

        async fn create_job(&self, name: &str, config: &CaptureJobConfig) -> Result<()> {
            if self.reject {
                return Err(Error::registration(
                    RegistrationFailure::Rejected,
                    "The capture service rejected the job (500 Internal Server Error)",
                ));
            }
            self.jobs.lock().unwrap().insert(name.to_string(), config.clone());
            Ok(())
        }

        async fn update_job(&self, name: &str, config: &CaptureJobConfig) -> Result<()> {
            self.create_job(name, config).await
        }

        async fn delete_job(&self, name: &str) -> Result<bool> {
            Ok(self.jobs.lock().unwrap().remove(name).is_some())
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        profiles: Mutex<HashMap<String, ConnectionProfile>>,
    }

    #[async_trait]
    impl ProfileStore for MemoryStore {
        async fn get(&self, id: &str) -> Result<Option<ConnectionProfile>> {
            Ok(self.profiles.lock().unwrap().get(id).cloned())
        }

        async fn list(&self) -> Result<Vec<ConnectionProfile>> {
            Ok(self.profiles.lock().unwrap().values().cloned().collect())
        }

        async fn save(&self, profile: &ConnectionProfile) -> Result<()> {
            self.profiles
                .lock()
                .unwrap()
                .insert(profile.id.clone(), profile.clone());
            Ok(())
        }

        async fn delete(&self, id: &str) -> Result<bool> {
            Ok(self.profiles.lock().unwrap().remove(id).is_some())
        }
    }

    /// Delivers a fixed batch, then reports the broker as gone
    struct ReplayBroker {
        messages: Vec<RawMessage>,
    }

    struct NoopSubscription;

    #[async_trait]
    impl Subscription for NoopSubscription {
        async fn close(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl BrokerSubscriber for ReplayBroker {
        async fn subscribe(
            &self,
            _group_id: &str,
            _topics: &[String],
            sink: DeliverySink,
            _cancel: CancellationToken,
        ) -> Result<Box<dyn Subscription>> {
            for message in &self.messages {
                sink.deliver(message.clone());
            }
            sink.fail("all brokers down");
            Ok(Box::new(NoopSubscription))
        }
    }

    fn change_message(offset: i64) -> RawMessage {
        RawMessage {
            topic: "src1.all-changes".to_string(),
            partition: 0,
            offset,
            timestamp_ms: Some(1_700_000_000_000),
            headers: vec![],
            key: Some(r#"{"id":1}"#.to_string()),
            value: Some(
                json!({
                    "before": null,
                    "after": {"id": 1, "status": "new"},
                    "source": {"db": "shop", "table": "orders"},
                    "op": "c",
                    "ts_ms": 1_700_000_000_000i64
                })
                .to_string(),
            ),
        }
    }

    fn app(ready: bool, reject: bool, messages: Vec<RawMessage>) -> (Router, Arc<MemoryStore>) {
        let mut registry = Registry::new();
        registry.register(Arc::new(StubHandler { ready }));
        let store = Arc::new(MemoryStore::default());
        let gateway = Arc::new(StubGateway {
            reject,
            ..StubGateway::default()
        });
        let lifecycle = Arc::new(ConnectorLifecycleManager::new(
            Arc::new(registry),
            gateway,
            store.clone(),
            Duration::from_secs(1),
        ));
        let relay = Arc::new(StreamRelay::new(
            Arc::new(ReplayBroker { messages }),
            RelayConfig::default(),
        ));
        (router(AppState::new(lifecycle, relay)), store)
    }

    fn profile_body() -> Body {
        Body::from(
            json!({
                "id": "src1",
                "name": "orders",
                "engine_type": "postgres",
                "host": "localhost",
                "username": "postgres",
                "password": "secret",
                "database": "shop"
            })
            .to_string(),
        )
    }

    fn json_request(method: &str, uri: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_health_and_engines() {
        let (app, _) = app(true, false, vec![]);

        let (status, body) = send(&app, json_request("GET", "/health", Body::empty())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "healthy");

        let (_, body) = send(&app, json_request("GET", "/api/engines", Body::empty())).await;
        assert_eq!(body["data"], json!(["postgres"]));
    }

    #[tokio::test]
    async fn test_create_get_delete_profile() {
        let (app, _) = app(true, false, vec![]);

        let (status, body) = send(&app, json_request("POST", "/api/profiles", profile_body())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["port"], 5432);

        let (status, body) =
            send(&app, json_request("GET", "/api/profiles/src1", Body::empty())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "orders");

        let (_, body) = send(
            &app,
            json_request("GET", "/api/profiles/src1/readiness", Body::empty()),
        )
        .await;
        assert_eq!(body["data"]["state"], "ready");

        let (status, _) = send(&app, json_request("POST", "/api/profiles", profile_body())).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) =
            send(&app, json_request("DELETE", "/api/profiles/src1", Body::empty())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["unregistered"], true);

        let (status, _) = send(&app, json_request("GET", "/api/profiles/src1", Body::empty())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_not_ready_source_is_rejected_with_steps() {
        let (app, store) = app(false, false, vec![]);

        let (status, body) = send(&app, json_request("POST", "/api/profiles", profile_body())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_FAILED");
        assert_eq!(body["errors"].as_array().map(Vec::len), Some(1));
        assert!(store.profiles.lock().unwrap().is_empty());

        let (status, body) = send(
            &app,
            json_request("POST", "/api/profiles/validate", profile_body()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["ready"], false);
        assert_eq!(body["data"]["steps"][1]["status"], "error");
    }

    #[tokio::test]
    async fn test_rejected_registration_is_bad_gateway() {
        let (app, store) = app(true, true, vec![]);

        let (status, body) = send(&app, json_request("POST", "/api/profiles", profile_body())).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["code"], "REGISTRATION_FAILED");
        assert!(store.profiles.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_of_unknown_profile() {
        let (app, _) = app(true, false, vec![]);
        let (status, _) = send(&app, json_request("PUT", "/api/profiles/src1", profile_body())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_event_stream_of_unknown_profile() {
        let (app, _) = app(true, false, vec![]);
        let (status, _) = send(
            &app,
            json_request("GET", "/api/profiles/nope/events", Body::empty()),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_event_stream_dedups_and_reports_failure() {
        let (app, _) = app(
            true,
            false,
            vec![change_message(42), change_message(42), change_message(43)],
        );
        send(&app, json_request("POST", "/api/profiles", profile_body())).await;

        let response = app
            .clone()
            .oneshot(json_request("GET", "/api/profiles/src1/events", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert_eq!(text.matches("event: change").count(), 2);
        assert!(text.contains("id: 1-42"));
        assert!(text.contains("id: 2-43"));
        assert!(text.contains(r#""changes":[{"column":"id""#));
        assert!(text.contains("event: error"));
    }
}
