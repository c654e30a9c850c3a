use std::{fmt::Debug, sync::Arc, time::Duration};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::{api::core::v1::Pod, NamespaceResourceScope};
use kube::{
    api::ListParams,
    runtime::{
        controller::Action,
        events::{Recorder, Reporter},
        finalizer::{finalizer, Event as Finalizer},
        reflector::ObjectRef,
        watcher::Config as WatcherConfig,
        Controller,
    },
    Api, Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;
use tracing::{error, field, info, instrument, warn, Span};

use crate::{
    reconcilers::{Context, Reconcile},
    resources::{ImageScanningRequest, ImageSigningRequest},
    telemetry,
    workers::{endpoint_for, owner_of, WorkerKind},
    Config, Error, Metrics, Result, MANAGER,
};

pub const FINALIZER: &str = "cop.redhat.com/image-security";

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
            reporter: MANAGER.into(),
        }
    }
}
impl Diagnostics {
    pub fn recorder<K>(&self, client: Client, obj: &K) -> Recorder
    where
        K: Resource<DynamicType = ()>,
    {
        Recorder::new(client, self.reporter.clone(), obj.object_ref(&()))
    }
}

/// State shared between the controllers and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the reconcilers
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
    pub(crate) fn to_context(&self, client: Client, config: Config) -> Result<Arc<Context>> {
        Ok(Arc::new(Context {
            endpoint: endpoint_for(&config, client.clone())?,
            client,
            config,
            metrics: Metrics::default().register(&self.registry)?,
            diagnostics: self.diagnostics.clone(),
        }))
    }
}

pub struct ImageSecurityController {
    state: State,
    config: Config,
}

impl ImageSecurityController {
    pub fn new(state: State, config: Config) -> Self {
        Self { state, config }
    }

    /// Initialize both controllers and shared state (given the crds are installed)
    pub async fn run(self) -> Result<(), anyhow::Error> {
        // Get a k8s client for communicating with the cluster
        let client = Client::try_default()
            .await
            .context("failed to create kube Client")?;

        let signing_requests = Api::<ImageSigningRequest>::all(client.clone());
        let scanning_requests = Api::<ImageScanningRequest>::all(client.clone());
        let worker_pods = Api::<Pod>::namespaced(client.clone(), &self.config.target_project);

        // Test that we can actually query for our CRDs (a.k.a. they are installed)
        let probe = ListParams::default().limit(1);
        if let Err(e) = signing_requests.list(&probe).await {
            error!("ImageSigningRequest CRD is not queryable; {e:?}. Is the CRD installed?");
            info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
            std::process::exit(1);
        }
        if let Err(e) = scanning_requests.list(&probe).await {
            error!("ImageScanningRequest CRD is not queryable; {e:?}. Is the CRD installed?");
            info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
            std::process::exit(1);
        }

        info!(
            "Launching workers in namespace {} using image {}",
            self.config.target_project, self.config.sign_scan_image
        );
        let context = self.state.to_context(client, self.config)?;

        let watching_config = WatcherConfig::default().any_semantic();
        let signing = Controller::new(signing_requests, watching_config.clone())
            .shutdown_on_signal()
            .watches(
                worker_pods.clone(),
                WatcherConfig::default().labels(&WorkerKind::Signing.selector()),
                owning_request,
            )
            .run(
                reconcile::<ImageSigningRequest>,
                error_policy::<ImageSigningRequest>,
                context.clone(),
            )
            .filter_map(|x| async move { Result::ok(x) })
            .for_each(|_| futures::future::ready(()));

        let scanning = Controller::new(scanning_requests, watching_config)
            .shutdown_on_signal()
            .watches(
                worker_pods,
                WatcherConfig::default().labels(&WorkerKind::Scanning.selector()),
                owning_request,
            )
            .run(
                reconcile::<ImageScanningRequest>,
                error_policy::<ImageScanningRequest>,
                context,
            )
            .filter_map(|x| async move { Result::ok(x) })
            .for_each(|_| futures::future::ready(()));

        futures::join!(signing, scanning);

        Ok(())
    }
}

/// Map a worker pod event back onto the request that launched the pod
fn owning_request<K>(pod: Pod) -> Option<ObjectRef<K>>
where
    K: Resource<DynamicType = ()>,
{
    let (namespace, name) = owner_of(&pod)?;
    Some(ObjectRef::new(&name).within(&namespace))
}

// Error handler for failed reconciliations
fn error_policy<K>(request: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action
where
    K: Resource<DynamicType = ()>,
{
    warn!("reconcile failed: {:?}", error);
    ctx.metrics.reconcile_failure(request.as_ref(), error);
    Action::requeue(Duration::from_secs(5))
}

/// Entry point of both controllers; runs the request's reconciler behind the finalizer
#[instrument(skip(ctx, request), fields(trace_id))]
async fn reconcile<K>(request: Arc<K>, ctx: Arc<Context>) -> Result<Action>
where
    K: Reconcile
        + Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    // Add some tracing for debugging's sake
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", &field::display(&trace_id));

    // Take some metrics to see the average reconcile time
    let _timer = ctx.metrics.count_and_measure();
    ctx.diagnostics.write().await.last_event = Utc::now();

    let name = request.name_any();
    let namespace = request
        .namespace()
        .ok_or_else(|| Error::IllegalRequest(name.clone(), "missing namespace".into()))?;
    let requests: Api<K> = Api::namespaced(ctx.client.clone(), &namespace);

    info!(r#"Reconciling {} "{namespace}/{name}""#, K::kind(&()));
    finalizer(&requests, FINALIZER, request, |event| async {
        match event {
            Finalizer::Apply(r) => r.reconcile(ctx.clone()).await,
            Finalizer::Cleanup(r) => r.cleanup(ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::FinalizerError(Box::new(e)))
}
