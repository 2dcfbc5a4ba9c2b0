use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use kube::{
    runtime::{
        controller::Action,
        events::{Event, EventType},
    },
    ResourceExt as _,
};
use tracing::{info, warn};

use super::{synchronize, ConfigMapSync, Context, DeploymentSync, Reconcile, ServiceSync};
use crate::{resources::WebApp, Error, Result};

#[async_trait]
impl Reconcile for WebApp {
    async fn reconcile(&self, context: Arc<Context>) -> Result<Action> {
        let name = self.name_any();
        let namespace = self.namespace().ok_or(Error::IllegalWebApp)?;

        if self.spec.paused {
            info!(r#"WebApp "{namespace}/{name}" is paused, leaving dependents untouched"#);
            return Ok(Action::await_change());
        }

        if let Err(violation) = self.spec.validate() {
            warn!(r#"WebApp "{namespace}/{name}" bypassed admission: {violation}"#);
            self.publish_failure(context, &violation).await?;
            return Ok(Action::await_change());
        }

        // The page must exist before the Deployment mounts it; the Service is
        // independent but ordered last so visible effects stay deterministic.
        // A failed step aborts the rest; each step is idempotent and the
        // runtime redrives the whole invocation with backoff.
        synchronize(&ConfigMapSync, self, context.client.clone()).await?;
        let deployment = synchronize(&DeploymentSync, self, context.client.clone()).await?;
        let service = synchronize(&ServiceSync, self, context.client.clone()).await?;

        self.publish_status(context, &deployment, &service).await?;

        // Resync on a timer as a safety net against missed dependent events
        Ok(Action::requeue(Duration::from_secs(5 * 60)))
    }

    async fn cleanup(&self, context: Arc<Context>) -> Result<Action> {
        let recorder = context
            .diagnostics
            .read()
            .await
            .recorder(context.client.clone(), self);

        // Dependents disappear with the record through their owner references,
        // and no non-cascadable resources exist yet, so cleanup only leaves an
        // audit trail. External teardown slots in here when that changes.
        recorder
            .publish(Event {
                type_: EventType::Normal,
                reason: "DeleteRequested".into(),
                note: Some(format!("Delete `{}`", self.name_any())),
                action: "Deleting".into(),
                secondary: None,
            })
            .await
            .map_err(Error::KubeError)?;

        Ok(Action::await_change())
    }
}

impl WebApp {
    /// Generate a name with the webapp instance as a prefix
    pub fn prefixed_name(&self, rest: impl AsRef<str>) -> String {
        format!("{}-{}", self.name_any(), rest.as_ref())
    }
}
