use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::{
    api::{apps::v1::Deployment, core::v1::Service},
    apimachinery::pkg::apis::meta::v1::{Condition, Time},
};
use kube::{
    api::{Patch, PatchParams},
    Api, ResourceExt as _,
};
use serde_json::json;

use super::{Context, FIELD_MANAGER};
use crate::{
    resources::{WebApp, WebAppPhase, WebAppStatus},
    Error, Result,
};

pub const CONDITION_AVAILABLE: &str = "Available";

/// Project the observed state of the dependents onto a fresh status.
///
/// Pure: reads only the record (including its prior status, for condition
/// transition bookkeeping) and the live dependents.
pub fn project_status(
    webapp: &WebApp,
    deployment: &Deployment,
    service: &Service,
    now: Time,
) -> WebAppStatus {
    let desired = webapp.spec.replicas;

    // Readiness is judged by the platform via the configured probes; the
    // counters are mirrored, never recomputed
    let available = deployment
        .status
        .as_ref()
        .and_then(|status| status.available_replicas)
        .unwrap_or(0);
    let ready = deployment
        .status
        .as_ref()
        .and_then(|status| status.ready_replicas)
        .unwrap_or(0);

    let url = service
        .spec
        .as_ref()
        .and_then(|spec| spec.cluster_ip.as_ref())
        .filter(|ip| !ip.is_empty() && ip.as_str() != "None")
        .map(|ip| format!("http://{ip}:{}", webapp.spec.port));

    let phase = if available == 0 {
        WebAppPhase::Pending
    } else if ready < desired {
        WebAppPhase::Degraded
    } else {
        WebAppPhase::Running
    };

    let mut conditions = webapp
        .status
        .as_ref()
        .map(|status| status.conditions.clone())
        .unwrap_or_default();
    let (cond_status, reason, message) = if available >= desired {
        (
            "True",
            "DeploymentAvailable",
            format!("{available}/{desired} replicas are available"),
        )
    } else {
        (
            "False",
            "DeploymentUnavailable",
            format!("only {available}/{desired} replicas are available"),
        )
    };
    set_condition(&mut conditions, Condition {
        type_: CONDITION_AVAILABLE.into(),
        status: cond_status.into(),
        reason: reason.into(),
        message,
        last_transition_time: now,
        observed_generation: webapp.metadata.generation,
    });

    WebAppStatus {
        available_replicas: available,
        ready_replicas: ready,
        phase,
        deployment_name: deployment.name_any(),
        service_name: service.name_any(),
        url,
        conditions,
    }
}

/// Upsert a condition by type.
///
/// The transition timestamp is carried over from the previous condition
/// unless the status value actually flipped; reason and message always
/// reflect the latest computation.
fn set_condition(conditions: &mut Vec<Condition>, mut next: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == next.type_) {
        Some(previous) => {
            if previous.status == next.status {
                next.last_transition_time = previous.last_transition_time.clone();
            }
            *previous = next;
        }
        None => conditions.push(next),
    }
}

/// Whether a freshly projected status is observably identical to the prior
/// one, in which case the write is skipped to avoid self-triggered loops
fn unchanged(prior: &WebAppStatus, next: &WebAppStatus) -> bool {
    prior.phase == next.phase
        && prior.available_replicas == next.available_replicas
        && prior.ready_replicas == next.ready_replicas
        && prior.url == next.url
}

impl WebApp {
    pub(crate) async fn publish_status(
        &self,
        context: Arc<Context>,
        deployment: &Deployment,
        service: &Service,
    ) -> Result<()> {
        let next = project_status(self, deployment, service, Time(Utc::now()));
        if self
            .status
            .as_ref()
            .is_some_and(|prior| unchanged(prior, &next))
        {
            return Ok(());
        }

        self.patch_status(context, next).await
    }

    /// Surface a spec that slipped past admission as a permanent failure.
    ///
    /// Retrying cannot fix an invalid spec, so the phase is parked at Failed
    /// until the user edits the record.
    pub(crate) async fn publish_failure(&self, context: Arc<Context>, violation: &str) -> Result<()> {
        if self
            .status
            .as_ref()
            .is_some_and(|status| status.phase == WebAppPhase::Failed)
        {
            return Ok(());
        }

        let mut status = self.status.clone().unwrap_or_default();
        status.phase = WebAppPhase::Failed;
        set_condition(&mut status.conditions, Condition {
            type_: CONDITION_AVAILABLE.into(),
            status: "False".into(),
            reason: "InvalidSpec".into(),
            message: violation.into(),
            last_transition_time: Time(Utc::now()),
            observed_generation: self.metadata.generation,
        });

        self.patch_status(context, status).await
    }

    async fn patch_status(&self, context: Arc<Context>, status: WebAppStatus) -> Result<()> {
        let name = self.name_any();
        let namespace = self.namespace().ok_or(Error::IllegalWebApp)?;
        let webapps: Api<WebApp> = Api::namespaced(context.client.clone(), &namespace);

        let new_status = Patch::Apply(json!({
            "apiVersion": "apps.codewizard.io/v1",
            "kind": "WebApp",
            "status": status,
        }));
        let ps = PatchParams::apply(FIELD_MANAGER).force();
        let _o = webapps
            .patch_status(&name, &ps, &new_status)
            .await
            .map_err(Error::KubeError)?;

        Ok(())
    }
}
