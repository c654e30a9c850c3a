use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ExecutionStatus;
use crate::openscap::ScanResult;

/// A request to run an OpenSCAP scan against the image an image stream tag points at
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    kind = "ImageScanningRequest",
    group = "cop.redhat.com",
    version = "v1alpha2",
    status = "ImageScanningRequestStatus",
    doc = "A request to scan a container image",
    namespaced,
    printcolumn = r#"{ "name": "tag", "type": "string", "description": "image stream tag to scan", "jsonPath": ".spec.imageStreamTag" }"#,
    printcolumn = r#"{ "name": "phase", "type": "string", "description": "request phase", "jsonPath": ".status.phase" }"#,
    printcolumn = r#"{ "name": "failed", "type": "integer", "description": "failed rules", "jsonPath": ".status.scanResult.failedRules" }"#
)]
#[serde(rename_all = "camelCase")]
pub struct ImageScanningRequestSpec {
    /// The image stream tag to scan, as `name[:tag]`.
    pub image_stream_tag: String,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageScanningRequestStatus {
    #[serde(flatten)]
    pub execution: ExecutionStatus,

    /// Digest of the image handed to the scanning pod
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scanned_image: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_result: Option<ScanResult>,
}
