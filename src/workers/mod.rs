use k8s_openapi::{
    api::core::v1::{
        Container, ContainerPort, EnvVar, EnvVarSource, HostPathVolumeSource,
        ObjectFieldSelector, Pod, PodSpec, SecretVolumeSource, SecurityContext, Volume,
        VolumeMount,
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use chrono::{DateTime, Utc};
use kube::ResourceExt;

use crate::{
    labels,
    resources::{OWNER_ANNOTATION, TYPE_ANNOTATION},
    Config,
};

mod endpoint;
pub use endpoint::*;

/// Port the HTTP server of a scanning pod listens on
pub const WORKER_PORT: i32 = 8080;

const SIGN_COMMAND: &str =
    "mkdir -p ~/.gnupg && cp /root/gpg/* ~/.gnupg && /usr/local/bin/sign-image";
const SCAN_COMMAND: &str = "/usr/local/bin/scan-image";
const SIGSTORE_PATH: &str = "/var/lib/containers/sigstore/";
const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// The two kinds of work the operator hands out to pods
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerKind {
    Signing,
    Scanning,
}

impl WorkerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerKind::Signing => "image-signing",
            WorkerKind::Scanning => "image-scanning",
        }
    }

    /// Label selector matching every pod of this kind
    pub fn selector(self) -> String {
        format!("type={}", self.as_str())
    }

    fn metadata(self, config: &Config, name: &str, owner: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.into()),
            namespace: Some(config.target_project.clone()),
            labels: Some(labels! { "type" => self.as_str() }),
            annotations: Some(labels! {
                OWNER_ANNOTATION => owner,
                TYPE_ANNOTATION => self.as_str(),
            }),
            ..Default::default()
        }
    }
}

/// What a signing pod needs to know about the image and the key
#[derive(Clone, Debug)]
pub struct SigningJob<'a> {
    /// Pull spec of the image, as `repository:tag`
    pub image: &'a str,
    pub digest: &'a str,
    pub gpg_secret: &'a str,
    pub sign_by: &'a str,
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value.into()),
        value_from: None,
    }
}

fn host_path(name: &str, path: &str) -> (Volume, VolumeMount) {
    (
        Volume {
            name: name.into(),
            host_path: Some(HostPathVolumeSource {
                path: path.into(),
                type_: None,
            }),
            ..Default::default()
        },
        VolumeMount {
            name: name.into(),
            mount_path: path.into(),
            ..Default::default()
        },
    )
}

/// Build the pod signing an image on behalf of `owner` (`namespace/name`)
pub fn signing_pod(config: &Config, name: &str, owner: &str, job: &SigningJob<'_>) -> Pod {
    let mut volumes = vec![Volume {
        name: "gpg".into(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(job.gpg_secret.into()),
            ..Default::default()
        }),
        ..Default::default()
    }];
    let mut mounts = vec![VolumeMount {
        name: "gpg".into(),
        mount_path: "/root/gpg".into(),
        ..Default::default()
    }];

    // Signatures are written to the node's sigstore, so the pod has to land on a builder
    let node_selector = if config.host_path_mount {
        let (volume, mount) = host_path("sigstore", SIGSTORE_PATH);
        volumes.push(volume);
        mounts.push(mount);
        Some(labels! { "type" => "builder" })
    } else {
        None
    };

    Pod {
        metadata: WorkerKind::Signing.metadata(config, name, owner),
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "image-signer".into(),
                image: Some(config.sign_scan_image.clone()),
                image_pull_policy: Some("Always".into()),
                command: Some(vec!["/bin/bash".into(), "-c".into(), SIGN_COMMAND.into()]),
                env: Some(vec![
                    EnvVar {
                        name: "NAMESPACE".into(),
                        value: None,
                        value_from: Some(EnvVarSource {
                            field_ref: Some(ObjectFieldSelector {
                                field_path: "metadata.namespace".into(),
                                api_version: None,
                            }),
                            ..Default::default()
                        }),
                    },
                    env("IMAGE", job.image),
                    env("PUSH_TYPE", "podman"),
                    env("DIGEST", job.digest),
                    env("SIGNBY", job.sign_by),
                ]),
                security_context: Some(SecurityContext {
                    privileged: Some(true),
                    ..Default::default()
                }),
                volume_mounts: Some(mounts),
                ..Default::default()
            }],
            restart_policy: Some("Never".into()),
            service_account_name: Some(config.target_service_account.clone()),
            node_selector,
            volumes: Some(volumes),
            ..Default::default()
        }),
        status: None,
    }
}

/// Build the pod scanning `image` on behalf of `owner` (`namespace/name`)
pub fn scanning_pod(config: &Config, name: &str, owner: &str, image: &str) -> Pod {
    let (socket, socket_mount) = host_path("docker-socket", DOCKER_SOCKET);

    Pod {
        metadata: WorkerKind::Scanning.metadata(config, name, owner),
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "image-scanner".into(),
                image: Some(config.sign_scan_image.clone()),
                image_pull_policy: Some("Always".into()),
                command: Some(vec!["/bin/bash".into(), "-c".into(), SCAN_COMMAND.into()]),
                env: Some(vec![env("IMAGE", image)]),
                security_context: Some(SecurityContext {
                    privileged: Some(true),
                    ..Default::default()
                }),
                ports: Some(vec![ContainerPort {
                    name: Some("webdav".into()),
                    container_port: WORKER_PORT,
                    protocol: Some("TCP".into()),
                    ..Default::default()
                }]),
                volume_mounts: Some(vec![socket_mount]),
                ..Default::default()
            }],
            restart_policy: Some("Never".into()),
            service_account_name: Some(config.target_service_account.clone()),
            volumes: Some(vec![socket]),
            ..Default::default()
        }),
        status: None,
    }
}

/// The `(namespace, name)` of the request a worker pod belongs to.
///
/// Pods without both operator annotations, or with a malformed owner, belong to nobody.
pub fn owner_of(pod: &Pod) -> Option<(String, String)> {
    let annotations = pod.annotations();
    annotations.get(TYPE_ANNOTATION).filter(|t| !t.is_empty())?;

    let (namespace, name) = annotations.get(OWNER_ANNOTATION)?.split_once('/')?;
    if namespace.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }

    Some((namespace.into(), name.into()))
}

/// The phase reported by a pod, if any
pub fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref()?.phase.as_deref()
}

/// When the pod's containers started running.
///
/// Image pulls happen before this, so the time is the earliest a worker can
/// be expected to answer.
pub fn running_since(pod: &Pod) -> Option<DateTime<Utc>> {
    let status = pod.status.as_ref()?;
    status
        .container_statuses
        .iter()
        .flatten()
        .filter_map(|c| c.state.as_ref()?.running.as_ref()?.started_at.as_ref())
        .map(|t| t.0)
        .max()
}
