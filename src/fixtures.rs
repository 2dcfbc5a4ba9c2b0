//! Helper methods only available for tests
use std::sync::Arc;

use assert_json_diff::assert_json_include;
use http::{Request, Response};
use hyper::{body::to_bytes, Body};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Client, Resource as _, ResourceExt as _};
use prometheus::Registry;

use crate::{
    operator::WEBAPP_FINALIZER,
    reconcilers::Context,
    resources::{ServiceType, WebApp, WebAppSpec},
    Metrics, Result,
};

impl WebApp {
    /// A webapp the reconciler will accept
    pub fn test() -> Self {
        let mut webapp = WebApp::new("test", WebAppSpec {
            replicas: 2,
            image: "nginx:1.25.3".into(),
            message: "hello world".into(),
            port: 80,
            service_type: ServiceType::ClusterIP,
            paused: false,
            max_unavailable: 1,
        });
        webapp.meta_mut().namespace = Some("default".into());
        webapp
    }

    /// Modify webapp to carry the expected finalizer
    pub fn finalized(mut self) -> Self {
        self.finalizers_mut().push(WEBAPP_FINALIZER.to_string());
        self
    }

    /// Modify webapp to be paused
    pub fn paused(mut self) -> Self {
        self.spec.paused = true;
        self
    }

    /// Modify webapp to be mid-deletion
    pub fn needs_delete(mut self) -> Self {
        use chrono::prelude::{DateTime, TimeZone, Utc};
        let now: DateTime<Utc> = Utc.with_ymd_and_hms(2024, 5, 1, 12, 50, 32).unwrap();
        self.meta_mut().deletion_timestamp = Some(Time(now));
        self
    }
}

impl Context {
    // Create a test context with a mocked kube client, locally registered metrics and default diagnostics
    pub fn test() -> (Arc<Self>, ApiServerVerifier) {
        let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let mock_client = Client::new(mock_service, "default");
        let ctx = Self {
            client: mock_client,
            metrics: Metrics::default().register(&Registry::default()).unwrap(),
            diagnostics: Arc::default(),
        };
        (Arc::new(ctx), ApiServerVerifier(handle))
    }
}

type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;
pub struct ApiServerVerifier(ApiServerHandle);

/// Scenarios we test for in the mock apiserver
pub enum Scenario {
    /// The finalizer is added before anything else happens
    FinalizerCreation(WebApp),
    /// A paused webapp must not cause a single api request
    RadioSilence,
    /// All three dependents are created, then the status is projected
    DependentCreation(WebApp),
    /// Cleanup publishes an event with the given reason and removes the finalizer
    Cleanup(String, WebApp),
    /// A spec that bypassed admission is parked in the Failed phase
    FailurePublish(WebApp),
}

pub async fn timeout_after_1s(handle: tokio::task::JoinHandle<()>) {
    tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .expect("timeout on mock apiserver")
        .expect("scenario succeeded")
}

impl ApiServerVerifier {
    /// Tests only get to run specific scenarios that has matching handlers
    ///
    /// This setup makes it easy to handle multiple requests by chaining handlers together.
    ///
    /// NB: If the reconciler is making more calls than expected, the test will run past the
    /// handler chain and fail on a `next_request` unwrap in the scenario.
    pub fn run(self, scenario: Scenario) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            match scenario {
                Scenario::FinalizerCreation(webapp) => self.handle_finalizer_creation(webapp).await,
                Scenario::RadioSilence => Ok(self),
                Scenario::DependentCreation(webapp) => {
                    self.handle_dependent_get_then_create("/api/v1/namespaces/default/configmaps")
                        .await
                        .unwrap()
                        .handle_dependent_get_then_create(
                            "/apis/apps/v1/namespaces/default/deployments",
                        )
                        .await
                        .unwrap()
                        .handle_dependent_get_then_create("/api/v1/namespaces/default/services")
                        .await
                        .unwrap()
                        .handle_status_patch(webapp)
                        .await
                }
                Scenario::Cleanup(reason, webapp) => {
                    self.handle_event_create(reason)
                        .await
                        .unwrap()
                        .handle_finalizer_removal(webapp)
                        .await
                }
                Scenario::FailurePublish(webapp) => self.handle_failure_patch(webapp).await,
            }
            .expect("scenario completed without errors");
        })
    }

    async fn handle_finalizer_creation(mut self, webapp: WebApp) -> Result<Self> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        // We expect a json patch to the specified webapp adding our finalizer
        assert_eq!(request.method(), http::Method::PATCH);
        assert_eq!(
            request.uri().to_string(),
            format!(
                "/apis/apps.codewizard.io/v1/namespaces/default/webapps/{}?",
                webapp.name_any()
            )
        );
        let expected_patch = serde_json::json!([
            { "op": "test", "path": "/metadata/finalizers", "value": null },
            { "op": "add", "path": "/metadata/finalizers", "value": vec![WEBAPP_FINALIZER] }
        ]);
        let request_body = to_bytes(request.into_body()).await.unwrap();
        let runtime_patch: serde_json::Value =
            serde_json::from_slice(&request_body).expect("valid webapp from runtime");
        assert_json_include!(actual: runtime_patch, expected: expected_patch);

        let response = serde_json::to_vec(&webapp.finalized()).unwrap();
        send.send_response(Response::builder().body(Body::from(response)).unwrap());
        Ok(self)
    }

    async fn handle_finalizer_removal(mut self, webapp: WebApp) -> Result<Self> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        // We expect a json patch to the specified webapp removing our finalizer (at index 0)
        assert_eq!(request.method(), http::Method::PATCH);
        assert_eq!(
            request.uri().to_string(),
            format!(
                "/apis/apps.codewizard.io/v1/namespaces/default/webapps/{}?",
                webapp.name_any()
            )
        );
        let expected_patch = serde_json::json!([
            { "op": "test", "path": "/metadata/finalizers/0", "value": WEBAPP_FINALIZER },
            { "op": "remove", "path": "/metadata/finalizers/0" }
        ]);
        let request_body = to_bytes(request.into_body()).await.unwrap();
        let runtime_patch: serde_json::Value =
            serde_json::from_slice(&request_body).expect("valid webapp from runtime");
        assert_json_include!(actual: runtime_patch, expected: expected_patch);

        let response = serde_json::to_vec(&webapp).unwrap();
        send.send_response(Response::builder().body(Body::from(response)).unwrap());
        Ok(self)
    }

    async fn handle_event_create(mut self, reason: String) -> Result<Self> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::POST);
        assert_eq!(
            request.uri().to_string(),
            "/apis/events.k8s.io/v1/namespaces/default/events?"
        );
        // verify the event reason matches the expected
        let request_body = to_bytes(request.into_body()).await.unwrap();
        let postdata: serde_json::Value =
            serde_json::from_slice(&request_body).expect("valid event from runtime");
        assert_eq!(
            postdata.get("reason").unwrap().as_str().map(String::from),
            Some(reason)
        );
        // then pass it back
        send.send_response(Response::builder().body(Body::from(request_body)).unwrap());
        Ok(self)
    }

    /// The dependent is first read (absent) and then created
    async fn handle_dependent_get_then_create(mut self, collection: &str) -> Result<Self> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::GET);
        assert!(
            request.uri().path().starts_with(collection),
            "unexpected dependent read: {}",
            request.uri()
        );
        send.send_response(
            Response::builder()
                .status(404)
                .body(Body::from(serde_json::to_vec(&not_found()).unwrap()))
                .unwrap(),
        );

        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::POST);
        assert_eq!(request.uri().path(), collection);
        let request_body = to_bytes(request.into_body()).await.unwrap();
        let created: serde_json::Value =
            serde_json::from_slice(&request_body).expect("valid dependent from runtime");
        assert!(
            created
                .pointer("/metadata/ownerReferences/0/controller")
                .is_some(),
            "dependent carries an owner reference for cascade deletion"
        );
        // echo the created object back
        send.send_response(Response::builder().body(Body::from(request_body)).unwrap());
        Ok(self)
    }

    async fn handle_status_patch(mut self, webapp: WebApp) -> Result<Self> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::PATCH);
        assert_eq!(
            request.uri().path(),
            format!(
                "/apis/apps.codewizard.io/v1/namespaces/default/webapps/{}/status",
                webapp.name_any()
            )
        );
        let request_body = to_bytes(request.into_body()).await.unwrap();
        let status_patch: serde_json::Value =
            serde_json::from_slice(&request_body).expect("valid status patch");
        // freshly created dependents report no availability yet
        assert_eq!(
            status_patch.pointer("/status/phase").and_then(|p| p.as_str()),
            Some("Pending")
        );
        assert_eq!(
            status_patch
                .pointer("/status/availableReplicas")
                .and_then(|a| a.as_i64()),
            Some(0)
        );

        let response = serde_json::to_vec(&webapp).unwrap();
        send.send_response(Response::builder().body(Body::from(response)).unwrap());
        Ok(self)
    }

    async fn handle_failure_patch(mut self, webapp: WebApp) -> Result<Self> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::PATCH);
        assert_eq!(
            request.uri().path(),
            format!(
                "/apis/apps.codewizard.io/v1/namespaces/default/webapps/{}/status",
                webapp.name_any()
            )
        );
        let request_body = to_bytes(request.into_body()).await.unwrap();
        let status_patch: serde_json::Value =
            serde_json::from_slice(&request_body).expect("valid status patch");
        assert_eq!(
            status_patch.pointer("/status/phase").and_then(|p| p.as_str()),
            Some("Failed")
        );
        assert_eq!(
            status_patch
                .pointer("/status/conditions/0/reason")
                .and_then(|r| r.as_str()),
            Some("InvalidSpec")
        );

        let response = serde_json::to_vec(&webapp).unwrap();
        send.send_response(Response::builder().body(Body::from(response)).unwrap());
        Ok(self)
    }
}

fn not_found() -> serde_json::Value {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": "not found",
        "reason": "NotFound",
        "code": 404
    })
}
