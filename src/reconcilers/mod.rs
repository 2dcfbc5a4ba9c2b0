use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, DeleteParams, PostParams},
    runtime::controller::Action,
    Client, Resource, ResourceExt as _,
};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::{operator::Diagnostics, resources::WebApp, Error, Metrics, Result};

mod config_map;
mod deployment;
mod service;
mod status;
mod webapp;

pub(crate) use config_map::ConfigMapSync;
pub(crate) use deployment::DeploymentSync;
pub(crate) use service::ServiceSync;
pub use status::project_status;

/// Field manager recorded on every write the operator performs
pub const FIELD_MANAGER: &str = "webapp-operator";

/// The context passed around
pub struct Context {
    /// Kubernetes client
    pub client: Client,

    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,

    /// Prometheus metrics
    pub metrics: Metrics,
}

/// A resource that can be reconciled by a controller
#[async_trait]
pub(crate) trait Reconcile {
    /// Converge all owned dependents and republish status
    async fn reconcile(&self, context: Arc<Context>) -> Result<Action, Error>;

    /// Release anything the platform cannot cascade-delete, before the object goes away
    async fn cleanup(&self, context: Arc<Context>) -> Result<Action, Error>;
}

/// How a tracked field of a dependent may be converged on the live object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FieldPolicy {
    /// The platform accepts an in-place write of the field.
    PatchInPlace,

    /// The platform rejects in-place writes; the dependent must be
    /// deleted and created fresh to change the field.
    RecreateOnChange,
}

/// A mutable field of a dependent that the operator owns and converges
///
/// Fields outside the tracked set are never written, so other controllers
/// may manage them without interference.
#[derive(Clone, Copy, Debug)]
pub(crate) struct TrackedField {
    pub name: &'static str,
    pub policy: FieldPolicy,
}

/// One dependent object kind owned by a WebApp
///
/// Implementations only declare what the dependent looks like and which
/// fields they own; [`synchronize`] drives every kind through the same
/// fetch/diff/apply steps.
pub(crate) trait Dependent {
    type Object: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug;

    /// Kind name used in logs
    const KIND: &'static str;

    /// Deterministic name of the dependent for this WebApp
    fn name(&self, webapp: &WebApp) -> String;

    /// The target object, always carrying an owner reference for cascade deletion
    fn desired(&self, webapp: &WebApp) -> Self::Object;

    /// Tracked fields on which the stored object differs from the target
    fn drift(&self, current: &Self::Object, desired: &Self::Object) -> Vec<TrackedField>;

    /// Copy every tracked field from the target onto the stored object
    fn overlay(&self, current: &mut Self::Object, desired: &Self::Object);
}

/// Converge one dependent toward its target shape.
///
/// Absent objects are created; drifting tracked fields are written in place,
/// unless one of them is immutable on the platform, in which case the whole
/// object is recreated. A stored object with no tracked drift is returned
/// untouched, so replaying the same state performs no writes.
pub(crate) async fn synchronize<D: Dependent>(
    dependent: &D,
    webapp: &WebApp,
    client: Client,
) -> Result<D::Object> {
    let namespace = webapp.namespace().ok_or(Error::IllegalWebApp)?;
    let name = dependent.name(webapp);
    let api = Api::<D::Object>::namespaced(client, &namespace);
    let desired = dependent.desired(webapp);

    let Some(mut current) = api.get_opt(&name).await.map_err(Error::KubeError)? else {
        info!(r#"Creating {} "{namespace}/{name}""#, D::KIND);
        return api
            .create(&post_params(), &desired)
            .await
            .map_err(Error::KubeError);
    };

    let drift = dependent.drift(&current, &desired);
    if drift.is_empty() {
        return Ok(current);
    }

    let fields = drift.iter().map(|f| f.name).collect::<Vec<_>>().join(", ");
    if drift
        .iter()
        .any(|field| field.policy == FieldPolicy::RecreateOnChange)
    {
        // The stored object cannot be patched into shape; replace it wholesale
        info!(r#"Recreating {} "{namespace}/{name}" ({fields})"#, D::KIND);
        api.delete(&name, &DeleteParams::default())
            .await
            .map_err(Error::KubeError)?;
        return api
            .create(&post_params(), &desired)
            .await
            .map_err(Error::KubeError);
    }

    info!(r#"Updating {} "{namespace}/{name}" ({fields})"#, D::KIND);
    dependent.overlay(&mut current, &desired);
    // replace carries the resourceVersion of the read, so a concurrent writer
    // turns this into a conflict that the runtime redrives from a fresh read
    api.replace(&name, &post_params(), &current)
        .await
        .map_err(Error::KubeError)
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.into()),

        ..Default::default()
    }
}

#[macro_export]
macro_rules! meta {
    (owners: $owners:expr, $($lhs:ident : $rhs:expr),* $(,)?) => {{
        ::kube::core::ObjectMeta {
            owner_references: Some($owners),
            $($lhs : $rhs),*,

            ..Default::default()
        }
    }};
}

#[macro_export]
macro_rules! labels {
    (instance: $name:expr) => {{
        ::std::collections::BTreeMap::from_iter([
            ("app.kubernetes.io/name".to_string(), "webapp".to_string()),
            ("app.kubernetes.io/instance".to_string(), $name),
            (
                "app.kubernetes.io/managed-by".to_string(),
                "webapp-operator".to_string(),
            ),
        ])
    }};
}
