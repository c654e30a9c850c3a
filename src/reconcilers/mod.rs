use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use k8s_openapi::{
    api::core::v1::{Pod, Secret},
    NamespaceResourceScope,
};
use kube::{
    api::{DeleteParams, Patch, PatchParams},
    runtime::{
        controller::Action,
        events::{Event, EventType},
    },
    Api, Client, CustomResourceExt, Resource, ResourceExt,
};
use lazy_static::lazy_static;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::{
    operator::Diagnostics,
    resources::{image_stream_tag_name, ImageStreamTag},
    workers::WorkerEndpoint,
    Config, Error, Metrics, MANAGER,
};

pub mod scanning;
pub mod signing;

lazy_static! {
    static ref APPLY: PatchParams = PatchParams::apply(MANAGER).force();
}

/// The context passed around
pub struct Context {
    /// Kubernetes client
    pub client: Client,

    /// Operator configuration
    pub config: Config,

    /// How scanning pods are reached
    pub endpoint: Arc<dyn WorkerEndpoint>,

    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,

    /// Prometheus metrics
    pub metrics: Metrics,
}

/// A request that can be reconciled by a controller
#[async_trait]
pub(crate) trait Reconcile
where
    Self: CustomResourceExt + ResourceExt,
{
    /// Advance the request by one step
    async fn reconcile(&self, context: Arc<Context>) -> Result<Action, Error>;

    /// Remove everything the request left behind in the worker namespace
    async fn cleanup(&self, context: Arc<Context>) -> Result<Action, Error>;
}

/// Identity of a request, as needed to name its worker
pub(crate) struct Coordinates {
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

impl Coordinates {
    pub fn of<K: ResourceExt>(obj: &K) -> Result<Self, Error> {
        let name = obj.name_any();
        let namespace = obj
            .namespace()
            .ok_or_else(|| Error::IllegalRequest(name.clone(), "missing namespace".into()))?;
        let uid = obj
            .uid()
            .ok_or_else(|| Error::IllegalRequest(name.clone(), "missing uid".into()))?;

        Ok(Self {
            name,
            namespace,
            uid,
        })
    }

    /// Value of the owner annotation on the request's worker pod
    pub fn owner(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Look up the tag a new request points at.
///
/// Any failure is turned into the message recorded on the request.
pub(crate) async fn lookup_tag(
    client: &Client,
    namespace: &str,
    tag: &str,
) -> Result<ImageStreamTag, String> {
    let tags = Api::<ImageStreamTag>::namespaced(client.clone(), namespace);
    let message = match tags.get_opt(&image_stream_tag_name(tag)).await {
        Ok(Some(found)) => return Ok(found),
        Ok(None) => format!("ImageStreamTag {tag} Not Found in Namespace {namespace}"),
        Err(e) => format!("Error retrieving ImageStreamTag: {e}"),
    };

    warn!("{message}");
    Err(message)
}

/// Replace the status of a request with `status`.
///
/// The write is conditional on the request not having changed since it was
/// read, so a status derived from a stale copy is rejected with a conflict.
pub(crate) async fn patch_status<K, S>(client: &Client, obj: &K, status: &S) -> Result<(), Error>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Debug,
    S: Serialize,
{
    let name = obj.name_any();
    let namespace = obj
        .namespace()
        .ok_or_else(|| Error::IllegalRequest(name.clone(), "missing namespace".into()))?;

    let new_status = Patch::Apply(json!({
        "apiVersion": K::api_version(&()),
        "kind": K::kind(&()),
        "metadata": { "resourceVersion": obj.resource_version() },
        "status": status,
    }));
    Api::<K>::namespaced(client.clone(), &namespace)
        .patch_status(&name, &APPLY, &new_status)
        .await?;

    Ok(())
}

/// Create (or converge) an object in the worker namespace
pub(crate) async fn apply_worker_object<K>(
    client: &Client,
    config: &Config,
    obj: &K,
) -> Result<(), kube::Error>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug,
{
    Api::<K>::namespaced(client.clone(), &config.target_project)
        .patch(&obj.name_any(), &APPLY, &Patch::Apply(obj))
        .await?;

    Ok(())
}

/// Fetch the worker pod of a request, if it still exists
pub(crate) async fn worker_pod(context: &Context, uid: &str) -> Result<Option<Pod>, Error> {
    Ok(
        Api::<Pod>::namespaced(context.client.clone(), &context.config.target_project)
            .get_opt(uid)
            .await?,
    )
}

/// Delete an object from the worker namespace; a missing object counts as deleted
pub(crate) async fn delete_worker_object<K>(context: &Context, name: &str) -> Result<(), Error>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Debug,
{
    let api = Api::<K>::namespaced(context.client.clone(), &context.config.target_project);
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Delete the worker pod of a finished request; failures are only logged
pub(crate) async fn discard_worker_pod(context: &Context, uid: &str) {
    if let Err(e) = delete_worker_object::<Pod>(context, uid).await {
        warn!("Failed to Delete Worker Pod '{uid}': {e}");
    }
}

/// Shared cleanup of both request kinds
pub(crate) async fn cleanup_request<K>(
    obj: &K,
    context: &Context,
    copied_secret: bool,
) -> Result<Action, Error>
where
    K: Resource<DynamicType = ()> + ResourceExt,
{
    let coordinates = Coordinates::of(obj)?;
    info!(
        "Cleaning up worker of {} '{}'",
        K::kind(&()),
        coordinates.owner()
    );

    delete_worker_object::<Pod>(context, &coordinates.uid).await?;
    if copied_secret {
        delete_worker_object::<Secret>(context, &coordinates.uid).await?;
    }

    let recorder = context
        .diagnostics
        .read()
        .await
        .recorder(context.client.clone(), obj);
    recorder
        .publish(Event {
            type_: EventType::Normal,
            reason: "DeleteRequested".into(),
            note: Some(format!("Delete `{}`", coordinates.name)),
            action: "Deleting".into(),
            secondary: None,
        })
        .await?;

    Ok(Action::await_change())
}
