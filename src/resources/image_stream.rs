use std::borrow::Cow;

use k8s_openapi::{apimachinery::pkg::apis::meta::v1::ObjectMeta, NamespaceResourceScope};
use kube::Resource;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Tag used when an image stream tag reference doesn't name one
pub const DEFAULT_TAG: &str = "latest";

/// An OpenShift `ImageStreamTag`, reduced to the fields the operator reads.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ImageStreamTag {
    pub metadata: ObjectMeta,

    /// The image the tag currently points at
    #[serde(default)]
    pub image: Image,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    /// Pull spec of the image, pinned by digest
    #[serde(default)]
    pub docker_image_reference: String,

    /// Signatures attached to the image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signatures: Option<Vec<ImageSignature>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct ImageSignature {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(rename = "type", default)]
    pub type_: String,
}

impl Resource for ImageStreamTag {
    type DynamicType = ();
    type Scope = NamespaceResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        "ImageStreamTag".into()
    }

    fn group(_: &()) -> Cow<'_, str> {
        "image.openshift.io".into()
    }

    fn version(_: &()) -> Cow<'_, str> {
        "v1".into()
    }

    fn plural(_: &()) -> Cow<'_, str> {
        "imagestreamtags".into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Image {
    pub fn is_signed(&self) -> bool {
        self.signatures.as_ref().is_some_and(|s| !s.is_empty())
    }
}

/// Split `name[:tag]` into its name and tag
pub fn parse_image_stream_tag(image_stream_tag: &str) -> (&str, &str) {
    match image_stream_tag.split_once(':') {
        Some((name, tag)) if !tag.is_empty() && !tag.contains(':') => (name, tag),
        Some((name, _)) => (name, DEFAULT_TAG),
        None => (image_stream_tag, DEFAULT_TAG),
    }
}

/// The object name of the tag a request refers to, with the default tag filled in
pub fn image_stream_tag_name(image_stream_tag: &str) -> String {
    let (name, tag) = parse_image_stream_tag(image_stream_tag);
    format!("{name}:{tag}")
}

/// Split a digest pinned pull spec into its repository and digest
pub fn split_image_reference(reference: &str) -> Result<(&str, &str), Error> {
    let mut parts = reference.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(repository), Some(digest), None) if !repository.is_empty() && !digest.is_empty() => {
            Ok((repository, digest))
        }
        _ => Err(Error::InvalidImageReference(reference.to_string())),
    }
}
