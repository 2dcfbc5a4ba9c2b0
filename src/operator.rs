use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{ConfigMap, Service},
};
use kube::{
    api::ListParams,
    runtime::{
        controller::Action,
        events::{Recorder, Reporter},
        finalizer::{finalizer, Event as Finalizer},
        watcher::Config,
        Controller,
    },
    Api, Client, Resource, ResourceExt,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{error, field, info, instrument, Span};

use crate::{
    reconcilers::{Context, Reconcile as _},
    resources::WebApp,
    telemetry, Error, Metrics, Result,
};

pub const WEBAPP_FINALIZER: &str = "apps.codewizard.io/finalizer";

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "webapp-operator".into(),
        }
    }
}
impl Diagnostics {
    pub fn recorder(&self, client: Client, webapp: &WebApp) -> Recorder {
        Recorder::new(client, self.reporter.clone(), webapp.object_ref(&()))
    }
}

/// State shared between the controller and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
}

/// State wrapper around the controller outputs for the web server
impl State {
    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    // Create a Controller Context that can update State
    pub(crate) fn to_context(&self, client: Client) -> Arc<Context> {
        Arc::new(Context {
            client,
            metrics: Metrics::default().register(&self.registry).unwrap(),
            diagnostics: self.diagnostics.clone(),
        })
    }
}

pub struct WebAppController {
    state: State,
}

impl WebAppController {
    pub fn new(state: State) -> Self {
        Self { state }
    }

    /// Initialize the controller and shared state (given the crd is installed)
    pub async fn run(self) -> Result<(), anyhow::Error> {
        // Error handler for failed reconciliations
        fn error_policy(webapp: Arc<WebApp>, error: &Error, ctx: Arc<Context>) -> Action {
            error!("reconcile failed: {:?}", error);
            ctx.metrics.reconcile_failure(&webapp, error);
            Action::requeue(Duration::from_secs(5))
        }

        // Get a k8s client for communicating with the cluster
        let client = Client::try_default()
            .await
            .expect("failed to create kube Client");

        // Fetcher for our CRD
        let webapps = Api::<WebApp>::all(client.clone());

        // Test that we can actually query for our CRD (a.k.a. it is installed)
        if let Err(e) = webapps.list(&ListParams::default().limit(1)).await {
            error!("CRD is not queryable; {e:?}. Is the CRD installed?");
            info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
            std::process::exit(1);
        }

        // Watch the primary resource plus every dependent kind it owns, so a
        // changed dependent requeues the owning WebApp
        let watching_config = Config::default().page_size(50).any_semantic();
        Controller::new(webapps, watching_config.clone())
            .shutdown_on_signal()
            .owns(Api::<Deployment>::all(client.clone()), watching_config.clone())
            .owns(Api::<Service>::all(client.clone()), watching_config.clone())
            .owns(Api::<ConfigMap>::all(client.clone()), watching_config)
            .run(reconcile, error_policy, self.state.to_context(client))
            .filter_map(|x| async move { Result::ok(x) })
            .for_each(|_| futures::future::ready(()))
            .await;

        Ok(())
    }
}

/// Main reconciler for the WebApp resource
#[instrument(skip(ctx, webapp), fields(trace_id))]
pub(crate) async fn reconcile(webapp: Arc<WebApp>, ctx: Arc<Context>) -> Result<Action> {
    // Add some tracing for debugging's sake
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", &field::display(&trace_id));

    // Take some metrics to see the average reconcile time
    let _timer = ctx.metrics.count_and_measure();
    ctx.diagnostics.write().await.last_event = Utc::now();

    let name = webapp.name_any();
    let namespace = webapp.namespace().ok_or(Error::IllegalWebApp)?;
    let webapps: Api<WebApp> = Api::namespaced(ctx.client.clone(), &namespace);

    info!(r#"Starting WebApp reconciliation for "{namespace}/{name}""#);
    finalizer(&webapps, WEBAPP_FINALIZER, webapp, |event| async {
        match event {
            Finalizer::Apply(webapp) => webapp.reconcile(ctx.clone()).await,
            Finalizer::Cleanup(webapp) => webapp.cleanup(ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::FinalizerError(Box::new(e)))
}
