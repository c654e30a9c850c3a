use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ExecutionStatus;

/// A request to sign the image an image stream tag points at
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    kind = "ImageSigningRequest",
    group = "cop.redhat.com",
    version = "v1alpha2",
    status = "ImageSigningRequestStatus",
    doc = "A request to sign a container image",
    namespaced,
    printcolumn = r#"{ "name": "tag", "type": "string", "description": "image stream tag to sign", "jsonPath": ".spec.imageStreamTag" }"#,
    printcolumn = r#"{ "name": "phase", "type": "string", "description": "request phase", "jsonPath": ".status.phase" }"#,
    printcolumn = r#"{ "name": "signed", "type": "string", "description": "signed image digest", "jsonPath": ".status.signedImage" }"#
)]
#[serde(rename_all = "camelCase")]
pub struct ImageSigningRequestSpec {
    /// The image stream tag to sign, as `name[:tag]`.
    pub image_stream_tag: String,

    /// Secret in the request's namespace holding the GPG key to sign with.
    ///
    /// When omitted, the operator's default key is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key_secret_name: Option<String>,

    /// Identity the image is signed as.
    ///
    /// Only honoured together with `signingKeySecretName`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key_sign_by: Option<String>,
}

/// The observed state of a signing request.
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageSigningRequestStatus {
    #[serde(flatten)]
    pub execution: ExecutionStatus,

    /// Digest of the image handed to the signing pod
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unsigned_image: Option<String>,

    /// Digest of the image once its signature has been observed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_image: Option<String>,
}
