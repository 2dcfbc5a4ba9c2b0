use k8s_openapi::{
    api::core::v1::{Service, ServicePort, ServiceSpec},
    apimachinery::pkg::util::intstr::IntOrString,
};
use kube::{Resource as _, ResourceExt as _};

use super::{Dependent, FieldPolicy, TrackedField};
use crate::{labels, meta, resources::WebApp};

// The platform rejects in-place writes of the service type
const TYPE: TrackedField = TrackedField {
    name: "type",
    policy: FieldPolicy::RecreateOnChange,
};
const PORT: TrackedField = TrackedField {
    name: "port",
    policy: FieldPolicy::PatchInPlace,
};

/// Owns the Service exposing the web server pods
pub(crate) struct ServiceSync;

impl ServiceSync {
    fn service_type(service: &Service) -> Option<&String> {
        service.spec.as_ref().and_then(|spec| spec.type_.as_ref())
    }

    fn port(service: &Service) -> Option<i32> {
        service
            .spec
            .as_ref()
            .and_then(|spec| spec.ports.as_ref())
            .and_then(|ports| ports.first())
            .map(|port| port.port)
    }
}

impl Dependent for ServiceSync {
    type Object = Service;

    const KIND: &'static str = "Service";

    fn name(&self, webapp: &WebApp) -> String {
        webapp.name_any()
    }

    fn desired(&self, webapp: &WebApp) -> Service {
        let owner = webapp.controller_owner_ref(&()).unwrap();
        let port = webapp.spec.port;

        Service {
            metadata: meta! {
                owners: vec![owner],
                name: Some(self.name(webapp)),
                labels: Some(labels! { instance: webapp.name_any() })
            },
            spec: Some(ServiceSpec {
                selector: Some(labels! { instance: webapp.name_any() }),
                type_: Some(webapp.spec.service_type.to_string()),
                ports: Some(vec![ServicePort {
                    name: Some("http".into()),
                    port,
                    protocol: Some("TCP".into()),
                    target_port: Some(IntOrString::Int(port)),

                    ..Default::default()
                }]),

                ..Default::default()
            }),
            status: None,
        }
    }

    fn drift(&self, current: &Service, desired: &Service) -> Vec<TrackedField> {
        let mut drift = Vec::new();

        if Self::service_type(current) != Self::service_type(desired) {
            drift.push(TYPE);
        }
        if let (Some(current_port), Some(desired_port)) =
            (Self::port(current), Self::port(desired))
        {
            if current_port != desired_port {
                drift.push(PORT);
            }
        }

        drift
    }

    fn overlay(&self, current: &mut Service, desired: &Service) {
        // only port drift lands here; a type change forces recreation instead
        let Some(port) = current
            .spec
            .as_mut()
            .and_then(|spec| spec.ports.as_mut())
            .and_then(|ports| ports.first_mut())
        else {
            return;
        };
        port.port = Self::port(desired).unwrap_or(port.port);
        port.target_port = Some(IntOrString::Int(port.port));
    }
}
