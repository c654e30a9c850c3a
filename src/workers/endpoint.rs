use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use hyper::Body;
use k8s_openapi::api::core::v1::Pod;
use kube::{Client, ResourceExt};
use tokio::time::timeout;
use tracing::debug;

use super::WORKER_PORT;
use crate::{config::WorkerAccess, Config, Error, Result};

const HEALTH_PATH: &str = "healthz";
const REPORT_PATH: &str = "api/v1/openscap";

/// The HTTP surface of a running scanning pod
#[async_trait]
pub trait WorkerEndpoint: Send + Sync {
    /// Whether the pod answers its health check with a 200
    async fn healthy(&self, pod: &Pod) -> bool;

    /// The raw OpenSCAP report produced by the pod
    async fn openscap_report(&self, pod: &Pod) -> Result<Vec<u8>>;
}

/// Pick the endpoint matching the configured worker access.
///
/// Every call to a worker is bounded by the poll interval.
pub fn endpoint_for(config: &Config, client: Client) -> Result<Arc<dyn WorkerEndpoint>> {
    let deadline = config.poll_interval();
    Ok(match config.worker_access {
        WorkerAccess::Proxy => Arc::new(ApiServerProxy::new(client, deadline)),
        WorkerAccess::Direct => Arc::new(DirectHttp::new(deadline)?),
    })
}

/// Reaches pods through the API server's pod proxy subresource
#[derive(Clone)]
pub struct ApiServerProxy {
    client: Client,
    deadline: Duration,
}

impl ApiServerProxy {
    pub fn new(client: Client, deadline: Duration) -> Self {
        Self { client, deadline }
    }

    fn request(pod: &Pod, path: &str) -> Result<http::Request<Vec<u8>>> {
        let name = pod.name_any();
        let namespace = pod
            .namespace()
            .ok_or_else(|| Error::IllegalRequest(name.clone(), "pod has no namespace".into()))?;

        let uri = format!(
            "/api/v1/namespaces/{namespace}/pods/http:{name}:{WORKER_PORT}/proxy/{path}"
        );
        Ok(http::Request::get(uri).body(vec![])?)
    }

    async fn check_health(&self, pod: &Pod) -> Result<http::StatusCode> {
        let request = Self::request(pod, HEALTH_PATH)?.map(Body::from);
        let response = timeout(self.deadline, self.client.send(request)).await??;
        Ok(response.status())
    }
}

#[async_trait]
impl WorkerEndpoint for ApiServerProxy {
    async fn healthy(&self, pod: &Pod) -> bool {
        match self.check_health(pod).await {
            Ok(status) => status == http::StatusCode::OK,
            Err(e) => {
                debug!("health check of {} failed: {e}", pod.name_any());
                false
            }
        }
    }

    async fn openscap_report(&self, pod: &Pod) -> Result<Vec<u8>> {
        let request = Self::request(pod, REPORT_PATH)?;
        let report = timeout(self.deadline, self.client.request_text(request)).await??;
        Ok(report.into_bytes())
    }
}

/// Reaches pods on their pod IP; needs the operator to be on the pod network
#[derive(Clone)]
pub struct DirectHttp {
    http: reqwest::Client,
}

impl DirectHttp {
    pub fn new(deadline: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(deadline).build()?;
        Ok(Self { http })
    }

    fn url(pod: &Pod, path: &str) -> Result<String> {
        let ip = pod
            .status
            .as_ref()
            .and_then(|s| s.pod_ip.as_deref())
            .ok_or_else(|| Error::IllegalRequest(pod.name_any(), "pod has no IP".into()))?;

        Ok(if ip.contains(':') {
            format!("http://[{ip}]:{WORKER_PORT}/{path}")
        } else {
            format!("http://{ip}:{WORKER_PORT}/{path}")
        })
    }
}

#[async_trait]
impl WorkerEndpoint for DirectHttp {
    async fn healthy(&self, pod: &Pod) -> bool {
        let url = match Self::url(pod, HEALTH_PATH) {
            Ok(url) => url,
            Err(e) => {
                debug!("cannot build health check for {}: {e}", pod.name_any());
                return false;
            }
        };

        match self.http.get(url).send().await {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(e) => {
                debug!("health check of {} failed: {e}", pod.name_any());
                false
            }
        }
    }

    async fn openscap_report(&self, pod: &Pod) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(Self::url(pod, REPORT_PATH)?)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.bytes().await?.to_vec())
    }
}
