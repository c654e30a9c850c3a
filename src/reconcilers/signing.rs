use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::{api::core::v1::Secret, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use kube::{runtime::controller::Action, Api};
use tracing::{error, info, warn};

use crate::{
    labels,
    resources::{
        image_stream_tag_name, parse_image_stream_tag, split_image_reference,
        ImageExecutionPhase, ImageSigningRequest, ImageSigningRequestStatus, ImageStreamTag,
        Transition, OWNER_ANNOTATION,
    },
    workers::{pod_phase, signing_pod, SigningJob},
    Error,
};

use super::{
    apply_worker_object, cleanup_request, lookup_tag, patch_status, worker_pod, Context,
    Coordinates, Reconcile,
};

#[async_trait]
impl Reconcile for ImageSigningRequest {
    async fn reconcile(&self, context: Arc<Context>) -> Result<Action, Error> {
        let status = self.status.clone().unwrap_or_default();

        match status.execution.phase {
            None => self.start(&context, status).await,
            Some(phase) if phase.is_finished() => Ok(Action::await_change()),
            Some(_) => self.follow(&context, status).await,
        }
    }

    async fn cleanup(&self, context: Arc<Context>) -> Result<Action, Error> {
        // the key may have been copied under an earlier spec
        cleanup_request(self, &context, true).await
    }
}

impl ImageSigningRequest {
    /// Check the image and launch a signing pod for it
    async fn start(
        &self,
        context: &Context,
        status: ImageSigningRequestStatus,
    ) -> Result<Action, Error> {
        let coordinates = Coordinates::of(self)?;
        let config = &context.config;
        let tag = &self.spec.image_stream_tag;

        let image_stream_tag = match lookup_tag(&context.client, &coordinates.namespace, tag).await
        {
            Ok(found) => found,
            Err(message) => {
                return self
                    .transition(context, status, Transition::InitializationFailed(message))
                    .await
            }
        };

        let (repository, digest) =
            split_image_reference(&image_stream_tag.image.docker_image_reference)?;

        if image_stream_tag.image.is_signed() {
            let message = format!("Signatures Exist on Image '{digest}'");
            warn!("{message}");
            return self
                .transition(context, status, Transition::InitializationFailed(message))
                .await;
        }
        info!("No Signatures Exist on Image '{digest}'");

        // Requests may bring their own key, which has to be next to the pod to be mounted
        let (gpg_secret, sign_by) = match &self.spec.signing_key_secret_name {
            None => (config.gpg_secret.clone(), config.gpg_sign_by.clone()),
            Some(secret_name) => {
                if !self.copy_signing_key(context, &coordinates, secret_name).await? {
                    let message = format!(
                        "GPG Secret '{secret_name}' Not Found in Namespace '{}'",
                        coordinates.namespace
                    );
                    warn!("{message}");
                    return self
                        .transition(context, status, Transition::InitializationFailed(message))
                        .await;
                }

                let sign_by = self
                    .spec
                    .signing_key_sign_by
                    .clone()
                    .unwrap_or_else(|| config.gpg_sign_by.clone());
                (coordinates.uid.clone(), sign_by)
            }
        };

        let (_, tag_name) = parse_image_stream_tag(tag);
        let image = format!("{repository}:{tag_name}");
        let pod = signing_pod(
            config,
            &coordinates.uid,
            &coordinates.owner(),
            &SigningJob {
                image: &image,
                digest,
                gpg_secret: &gpg_secret,
                sign_by: &sign_by,
            },
        );

        if let Err(e) = apply_worker_object(&context.client, config, &pod).await {
            let message = format!("Error Occurred Creating Signing Pod '{e}'");
            error!("{message}");
            return self
                .transition(context, status, Transition::InitializationFailed(message))
                .await;
        }

        let message = format!(
            "Signing Pod Launched '{}/{}'",
            config.target_project, coordinates.uid
        );
        info!("{message}");
        self.transition(
            context,
            status,
            Transition::Launched {
                message,
                image: digest.to_string(),
            },
        )
        .await
    }

    /// Copy the request's key into the worker namespace, named after the request.
    ///
    /// Returns false when the key doesn't exist.
    async fn copy_signing_key(
        &self,
        context: &Context,
        coordinates: &Coordinates,
        secret_name: &str,
    ) -> Result<bool, Error> {
        let secrets = Api::<Secret>::namespaced(context.client.clone(), &coordinates.namespace);
        let Some(source) = secrets.get_opt(secret_name).await? else {
            return Ok(false);
        };

        info!(
            "Copying Secret '{secret_name}' to Project '{}'",
            context.config.target_project
        );
        let copy = Secret {
            metadata: ObjectMeta {
                name: Some(coordinates.uid.clone()),
                namespace: Some(context.config.target_project.clone()),
                annotations: Some(labels! { OWNER_ANNOTATION => coordinates.owner() }),
                ..Default::default()
            },
            data: source.data,
            type_: source.type_,
            ..Default::default()
        };
        apply_worker_object(&context.client, &context.config, &copy).await?;

        Ok(true)
    }

    /// Follow the signing pod until it finishes
    async fn follow(
        &self,
        context: &Context,
        mut status: ImageSigningRequestStatus,
    ) -> Result<Action, Error> {
        let coordinates = Coordinates::of(self)?;
        let owner = coordinates.owner();

        let Some(pod) = worker_pod(context, &coordinates.uid).await? else {
            let message = format!(
                "Signing Pod '{}/{}' Not Found",
                context.config.target_project, coordinates.uid
            );
            warn!("{message}");
            return self
                .transition(context, status, Transition::Failed(message))
                .await;
        };

        match pod_phase(&pod) {
            Some("Failed") => {
                info!("Signing Pod Failed. Updating ImageSigningRequest {owner}");
                self.transition(context, status, Transition::Failed("Signing Pod Failed".into()))
                    .await
            }
            Some("Succeeded") => {
                let tag = &self.spec.image_stream_tag;
                let tags =
                    Api::<ImageStreamTag>::namespaced(context.client.clone(), &coordinates.namespace);
                let Some(image_stream_tag) = tags.get_opt(&image_stream_tag_name(tag)).await?
                else {
                    let message = format!(
                        "ImageStreamTag {tag} Not Found in Namespace {}",
                        coordinates.namespace
                    );
                    warn!("{message}");
                    return self
                        .transition(context, status, Transition::Failed(message))
                        .await;
                };

                let (_, digest) =
                    split_image_reference(&image_stream_tag.image.docker_image_reference)?;

                if image_stream_tag.image.is_signed() || context.config.sig_demo {
                    info!("Signing Pod Succeeded. Updating ImageSigningRequest {owner}");
                    status.signed_image = Some(digest.to_string());
                    self.transition(context, status, Transition::Succeeded("Image Signed".into()))
                        .await
                } else {
                    let message =
                        format!("No Signature Exists on Image '{digest}' After Signing Completed");
                    warn!("{message}");
                    self.transition(context, status, Transition::Failed(message))
                        .await
                }
            }
            _ => Ok(Action::requeue(context.config.poll_interval())),
        }
    }

    /// Record a step of this request and decide when to look at it again
    async fn transition(
        &self,
        context: &Context,
        mut status: ImageSigningRequestStatus,
        transition: Transition,
    ) -> Result<Action, Error> {
        status.execution.record(&transition);
        if let Transition::Launched { image, .. } = &transition {
            status.unsigned_image = Some(image.clone());
            status.signed_image = None;
        }

        patch_status(&context.client, self, &status).await?;

        Ok(match transition.phase() {
            ImageExecutionPhase::Running => Action::requeue(context.config.poll_interval()),
            _ => Action::await_change(),
        })
    }
}
