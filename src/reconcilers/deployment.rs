use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment},
        core::v1::{
            ConfigMapVolumeSource, Container, ContainerPort, HTTPGetAction, PodSpec,
            PodTemplateSpec, Probe, Volume, VolumeMount,
        },
    },
    apimachinery::pkg::{apis::meta::v1::LabelSelector, util::intstr::IntOrString},
};
use kube::{core::ObjectMeta, Resource as _, ResourceExt as _};
use tracing::warn;

use super::{Dependent, FieldPolicy, TrackedField};
use crate::{labels, meta, resources::WebApp};

const REPLICAS: TrackedField = TrackedField {
    name: "replicas",
    policy: FieldPolicy::PatchInPlace,
};
const IMAGE: TrackedField = TrackedField {
    name: "image",
    policy: FieldPolicy::PatchInPlace,
};
const PORT: TrackedField = TrackedField {
    name: "port",
    policy: FieldPolicy::PatchInPlace,
};

/// Owns the Deployment running the web server pods
///
/// Only replicas, image and port are converged after creation; the rolling
/// update budget and probe configuration are set at creation time only.
pub(crate) struct DeploymentSync;

impl DeploymentSync {
    fn replicas(deployment: &Deployment) -> Option<i32> {
        deployment.spec.as_ref().and_then(|spec| spec.replicas)
    }

    fn first_container(deployment: &Deployment) -> Option<&Container> {
        deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.template.spec.as_ref())
            .and_then(|pod| pod.containers.first())
    }

    fn container_port(container: &Container) -> Option<i32> {
        container
            .ports
            .as_ref()
            .and_then(|ports| ports.first())
            .map(|port| port.container_port)
    }

    fn http_probe(port: i32, initial_delay_seconds: i32, period_seconds: i32) -> Probe {
        Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/".into()),
                port: IntOrString::Int(port),

                ..Default::default()
            }),
            initial_delay_seconds: Some(initial_delay_seconds),
            period_seconds: Some(period_seconds),

            ..Default::default()
        }
    }
}

impl Dependent for DeploymentSync {
    type Object = Deployment;

    const KIND: &'static str = "Deployment";

    fn name(&self, webapp: &WebApp) -> String {
        webapp.name_any()
    }

    fn desired(&self, webapp: &WebApp) -> Deployment {
        let labels = labels! { instance: webapp.name_any() };
        let owner = webapp.controller_owner_ref(&()).unwrap();
        let port = webapp.spec.port;

        Deployment {
            metadata: meta! {
                owners: vec![owner],
                name: Some(self.name(webapp)),
                labels: Some(labels.clone())
            },

            spec: Some(DeploymentSpec {
                replicas: Some(webapp.spec.replicas),
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    match_expressions: None,
                },
                strategy: Some(DeploymentStrategy {
                    type_: Some("RollingUpdate".into()),
                    rolling_update: Some(RollingUpdateDeployment {
                        max_unavailable: Some(IntOrString::Int(webapp.spec.max_unavailable)),
                        max_surge: None,
                    }),
                }),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),

                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "web".into(),
                            image: Some(webapp.spec.image.clone()),
                            image_pull_policy: Some("IfNotPresent".into()),
                            ports: Some(vec![ContainerPort {
                                container_port: port,
                                protocol: Some("TCP".into()),

                                ..Default::default()
                            }]),
                            volume_mounts: Some(vec![VolumeMount {
                                name: "html".into(),
                                mount_path: "/usr/share/nginx/html".into(),

                                ..Default::default()
                            }]),
                            readiness_probe: Some(Self::http_probe(port, 5, 10)),
                            liveness_probe: Some(Self::http_probe(port, 15, 20)),

                            ..Default::default()
                        }],
                        volumes: Some(vec![Volume {
                            name: "html".into(),
                            config_map: Some(ConfigMapVolumeSource {
                                name: Some(webapp.prefixed_name("html")),

                                ..Default::default()
                            }),

                            ..Default::default()
                        }]),

                        ..Default::default()
                    }),
                },

                ..Default::default()
            }),

            ..Default::default()
        }
    }

    fn drift(&self, current: &Deployment, desired: &Deployment) -> Vec<TrackedField> {
        let mut drift = Vec::new();

        if Self::replicas(current) != Self::replicas(desired) {
            drift.push(REPLICAS);
        }

        // An externally emptied pod template is tolerated rather than fixed:
        // skip the container fields instead of failing the whole invocation
        let Some(current_container) = Self::first_container(current) else {
            warn!(
                r#"Deployment "{}" has no containers, leaving it untouched"#,
                current.name_any()
            );
            drift.clear();
            return drift;
        };
        let Some(desired_container) = Self::first_container(desired) else {
            return drift;
        };

        if current_container.image != desired_container.image {
            drift.push(IMAGE);
        }
        if let (Some(current_port), Some(desired_port)) = (
            Self::container_port(current_container),
            Self::container_port(desired_container),
        ) {
            if current_port != desired_port {
                drift.push(PORT);
            }
        }

        drift
    }

    fn overlay(&self, current: &mut Deployment, desired: &Deployment) {
        let Some(desired_container) = Self::first_container(desired).cloned() else {
            return;
        };
        let Some(spec) = current.spec.as_mut() else {
            return;
        };

        spec.replicas = Self::replicas(desired);

        let Some(container) = spec
            .template
            .spec
            .as_mut()
            .and_then(|pod| pod.containers.first_mut())
        else {
            return;
        };
        container.image = desired_container.image.clone();
        if let (Some(port), Some(desired_port)) = (
            container.ports.as_mut().and_then(|ports| ports.first_mut()),
            Self::container_port(&desired_container),
        ) {
            port.container_port = desired_port;
        }
    }
}
