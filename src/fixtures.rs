//! Helper methods only available for tests
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use http::{Method, Request, Response};
use hyper::{body::to_bytes, Body};
use k8s_openapi::api::core::v1::Pod;
use kube::{Client, Resource};
use serde_json::{json, Value};

use crate::{
    reconcilers::Context,
    resources::{
        ExecutionStatus, ImageScanningRequest, ImageScanningRequestSpec,
        ImageScanningRequestStatus, ImageSigningRequest, ImageSigningRequestSpec,
        ImageSigningRequestStatus, Transition,
    },
    workers::WorkerEndpoint,
    Config, Error, Metrics, Result,
};

pub const UID: &str = "4a5e0f5c-0c1d-4e4b-9b7e-3f2d1c0b9a87";
pub const RESOURCE_VERSION: &str = "4711";
pub const IST_PATH: &str = "/apis/image.openshift.io/v1/namespaces/default/imagestreamtags/app:latest";
pub const WORKER_POD_PATH: &str =
    "/api/v1/namespaces/image-management/pods/4a5e0f5c-0c1d-4e4b-9b7e-3f2d1c0b9a87";
pub const SIGNING_STATUS_PATH: &str =
    "/apis/cop.redhat.com/v1alpha2/namespaces/default/imagesigningrequests/test/status";
pub const SCANNING_STATUS_PATH: &str =
    "/apis/cop.redhat.com/v1alpha2/namespaces/default/imagescanningrequests/test/status";

fn launched() -> ExecutionStatus {
    let mut execution = ExecutionStatus::default();
    execution.record(&Transition::Launched {
        message: format!("Pod Launched 'image-management/{UID}'"),
        image: "sha256:0123abcd".into(),
    });
    execution
}

impl ImageSigningRequest {
    /// A fresh request in the default namespace
    pub fn test(tag: &str) -> Self {
        let mut request = ImageSigningRequest::new(
            "test",
            ImageSigningRequestSpec {
                image_stream_tag: tag.into(),
                ..Default::default()
            },
        );
        request.meta_mut().namespace = Some("default".into());
        request.meta_mut().uid = Some(UID.into());
        request.meta_mut().resource_version = Some(RESOURCE_VERSION.into());
        request
    }

    /// Modify the request so its signing pod has been launched
    pub fn running(mut self) -> Self {
        self.status = Some(ImageSigningRequestStatus {
            execution: launched(),
            unsigned_image: Some("sha256:0123abcd".into()),
            signed_image: None,
        });
        self
    }
}

impl ImageScanningRequest {
    /// A fresh request in the default namespace
    pub fn test(tag: &str) -> Self {
        let mut request = ImageScanningRequest::new(
            "test",
            ImageScanningRequestSpec {
                image_stream_tag: tag.into(),
            },
        );
        request.meta_mut().namespace = Some("default".into());
        request.meta_mut().uid = Some(UID.into());
        request.meta_mut().resource_version = Some(RESOURCE_VERSION.into());
        request
    }

    /// Modify the request so its scanning pod has been launched
    pub fn running(mut self) -> Self {
        self.status = Some(ImageScanningRequestStatus {
            execution: launched(),
            scanned_image: Some("sha256:0123abcd".into()),
            scan_result: None,
        });
        self
    }
}

/// The image stream tag `default/app:latest`
pub fn image_stream_tag(signed: bool) -> Value {
    let signatures = if signed {
        json!([{ "metadata": { "name": "sha256:0123abcd@5f2c" }, "type": "atomic" }])
    } else {
        Value::Null
    };

    json!({
        "apiVersion": "image.openshift.io/v1",
        "kind": "ImageStreamTag",
        "metadata": { "name": "app:latest", "namespace": "default" },
        "image": {
            "metadata": { "name": "sha256:0123abcd" },
            "dockerImageReference": "registry.example.com/default/app@sha256:0123abcd",
            "signatures": signatures,
        },
    })
}

/// The worker pod of the test requests, in the given phase
pub fn worker_pod_json(phase: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": UID,
            "namespace": "image-management",
            "annotations": {
                "cop.redhat.com/owner": "default/test",
                "cop.redhat.com/type": "image-scanning",
            },
        },
        "status": { "phase": phase, "podIP": "10.0.0.7" },
    })
}

/// A running worker pod whose container started at `started`
pub fn worker_pod_running_since(started: DateTime<Utc>) -> Value {
    let mut pod = worker_pod_json("Running");
    pod["status"]["containerStatuses"] = json!([{
        "name": "image-scanner",
        "image": "image-sign-scan-base",
        "imageID": "",
        "ready": true,
        "restartCount": 0,
        "state": { "running": { "startedAt": started.to_rfc3339_opts(SecondsFormat::Secs, true) } },
    }]);
    pod
}

/// A worker endpoint answering from memory
#[derive(Clone, Default)]
pub struct FakeEndpoint {
    pub healthy: bool,
    pub report: Option<Vec<u8>>,
}

#[async_trait]
impl WorkerEndpoint for FakeEndpoint {
    async fn healthy(&self, _pod: &Pod) -> bool {
        self.healthy
    }

    async fn openscap_report(&self, _pod: &Pod) -> Result<Vec<u8>> {
        self.report
            .clone()
            .ok_or_else(|| Error::InvalidReport("no report served".into()))
    }
}

/// How the mocked API server answers a request
pub enum Reply {
    /// 200 with the given object
    Json(Value),

    /// 200 with the request body
    Echo,

    /// 404 with a NotFound status
    NotFound,

    /// The given error code with a generic failure status
    Status(u16),
}

type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;

/// Answers the requests of a mocked kube client, one at a time
pub struct ApiServerVerifier(ApiServerHandle);

impl ApiServerVerifier {
    /// Answer the next request, which must match `method` and `path`.
    ///
    /// Returns the JSON body of the request (null if it had none).
    pub async fn handle(&mut self, method: Method, path: &str, reply: Reply) -> Value {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), method);
        assert_eq!(request.uri().path(), path);

        let body = to_bytes(request.into_body()).await.unwrap();
        let body: Value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).expect("request body is json")
        };

        let (code, response) = match reply {
            Reply::Json(value) => (200, value),
            Reply::Echo => (200, body.clone()),
            Reply::NotFound => (404, status_json(404, "NotFound")),
            Reply::Status(code) => (code, status_json(code, "InternalError")),
        };
        send.send_response(
            Response::builder()
                .status(code)
                .body(Body::from(serde_json::to_vec(&response).unwrap()))
                .unwrap(),
        );

        body
    }
}

fn status_json(code: u16, reason: &str) -> Value {
    json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": format!("request failed with {reason}"),
        "reason": reason,
        "code": code,
    })
}

impl Context {
    /// A context whose client talks to the returned verifier
    pub fn test(endpoint: impl WorkerEndpoint + 'static) -> (Arc<Self>, ApiServerVerifier) {
        Self::test_with(Config::default(), endpoint)
    }

    /// Same as `test`, with the given operator configuration
    pub fn test_with(
        config: Config,
        endpoint: impl WorkerEndpoint + 'static,
    ) -> (Arc<Self>, ApiServerVerifier) {
        let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let mock_client = Client::new(mock_service, "default");
        let context = Self {
            client: mock_client,
            config,
            endpoint: Arc::new(endpoint),
            metrics: Metrics::default(),
            diagnostics: Arc::default(),
        };
        (Arc::new(context), ApiServerVerifier(handle))
    }
}

/// Wait for the mocked API server to finish its scenario
pub async fn timeout_after_1s(handle: tokio::task::JoinHandle<()>) {
    tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .expect("timeout on mock apiserver")
        .expect("scenario succeeded")
}

