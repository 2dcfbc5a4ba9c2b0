use std::fmt::Display;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a small self-contained web service
///
/// The operator realizes a WebApp as a ConfigMap holding the served page,
/// a Deployment running the configured image, and a Service exposing it.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    kind = "WebApp",
    group = "apps.codewizard.io",
    version = "v1",
    status = "WebAppStatus",
    doc = "A declaratively managed web application",
    shortname = "wa",
    namespaced,
    printcolumn = r#"{ "name": "replicas", "type": "integer", "description": "desired replicas", "jsonPath": ".spec.replicas" }"#,
    printcolumn = r#"{ "name": "available", "type": "integer", "description": "available replicas", "jsonPath": ".status.availableReplicas" }"#,
    printcolumn = r#"{ "name": "phase", "type": "string", "description": "lifecycle phase", "jsonPath": ".status.phase" }"#,
    printcolumn = r#"{ "name": "image", "type": "string", "description": "container image", "jsonPath": ".spec.image" }"#
)]
#[serde(rename_all = "camelCase")]
pub struct WebAppSpec {
    /// The desired number of web server pods.
    #[serde(default = "defaults::replicas")]
    #[validate(range(min = 1, max = 10))]
    pub replicas: i32,

    /// The container image (repository:tag) to run.
    #[serde(default = "defaults::image")]
    #[validate(length(min = 1))]
    pub image: String,

    /// The HTML body text served by the web server.
    #[validate(length(min = 1, max = 500))]
    pub message: String,

    /// The container port the web server listens on.
    #[serde(default = "defaults::port")]
    #[validate(range(min = 1, max = 65535))]
    pub port: i32,

    /// How the Service exposes the web server.
    #[serde(default)]
    pub service_type: ServiceType,

    /// Halts reconciliation when true, leaving all dependents unchanged.
    ///
    /// Drift introduced while paused is deliberately not corrected until
    /// the WebApp is unpaused again.
    #[serde(default)]
    pub paused: bool,

    /// Max number of pods that may be unavailable during a rolling update.
    ///
    /// Must not exceed `replicas`.
    #[serde(default = "defaults::max_unavailable")]
    #[validate(range(min = 0))]
    pub max_unavailable: i32,
}

/// The exposure mode of the managed Service
#[derive(Deserialize, Serialize, Clone, Copy, Default, Debug, JsonSchema, PartialEq, Eq)]
pub enum ServiceType {
    /// Reachable on a cluster-internal IP only.
    #[default]
    ClusterIP,

    /// Additionally exposed on a static port of every node.
    NodePort,

    /// Exposed through a cloud provider load balancer.
    LoadBalancer,
}

/// The status of a WebApp, derived from its dependents
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct WebAppStatus {
    /// Number of pods counted as available by the Deployment.
    pub available_replicas: i32,

    /// Number of pods that have passed their readiness probe.
    pub ready_replicas: i32,

    /// Coarse lifecycle summary of the WebApp.
    pub phase: WebAppPhase,

    /// Name of the managed Deployment.
    pub deployment_name: String,

    /// Name of the managed Service.
    pub service_name: String,

    /// In-cluster address of the web application, once routable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Standard API conditions, keyed uniquely by type.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// The possible phases of a `WebApp`
#[derive(Deserialize, Serialize, Clone, Copy, Default, Debug, JsonSchema, PartialEq, Eq)]
pub enum WebAppPhase {
    /// No pod is available yet.
    #[default]
    Pending,

    /// All desired pods are ready.
    Running,

    /// Some, but not all, desired pods are ready.
    Degraded,

    /// The spec cannot be realized; user intervention is required.
    Failed,
}

impl WebAppSpec {
    /// Re-check the invariants the admission webhook enforces upstream.
    ///
    /// A violation observed here means the record bypassed admission, which is
    /// permanent until the user edits the spec, so callers surface it via the
    /// Failed phase instead of retrying.
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=10).contains(&self.replicas) {
            return Err(format!("replicas must be within 1..=10, got {}", self.replicas));
        }
        if self.message.is_empty() {
            return Err("message must not be empty".into());
        }
        if self.message.chars().count() > 500 {
            return Err("message must not exceed 500 characters".into());
        }
        if self.image.is_empty() {
            return Err("image must not be empty".into());
        }
        if !(1..=65535).contains(&self.port) {
            return Err(format!("port must be within 1..=65535, got {}", self.port));
        }
        if self.max_unavailable > self.replicas {
            return Err(format!(
                "maxUnavailable ({}) must not exceed replicas ({})",
                self.max_unavailable, self.replicas
            ));
        }
        Ok(())
    }
}

impl Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ServiceType::ClusterIP => "ClusterIP",
            ServiceType::NodePort => "NodePort",
            ServiceType::LoadBalancer => "LoadBalancer",
        })
    }
}

mod defaults {
    pub fn replicas() -> i32 {
        1
    }
    pub fn image() -> String {
        "nginx:1.25.3".into()
    }
    pub fn port() -> i32 {
        80
    }
    pub fn max_unavailable() -> i32 {
        1
    }
}
