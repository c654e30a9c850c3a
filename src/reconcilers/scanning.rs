use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use kube::runtime::controller::Action;
use tracing::{error, info, warn};

use crate::{
    openscap::ScanResult,
    resources::{
        parse_image_stream_tag, split_image_reference, ImageExecutionPhase, ImageScanningRequest,
        ImageScanningRequestStatus, Transition,
    },
    workers::{pod_phase, running_since, scanning_pod},
    Error,
};

use super::{
    apply_worker_object, cleanup_request, discard_worker_pod, lookup_tag, patch_status,
    worker_pod, Context, Coordinates, Reconcile,
};

#[async_trait]
impl Reconcile for ImageScanningRequest {
    async fn reconcile(&self, context: Arc<Context>) -> Result<Action, Error> {
        let status = self.status.clone().unwrap_or_default();

        match status.execution.phase {
            None => self.start(&context, status).await,
            Some(phase) if phase.is_finished() => Ok(Action::await_change()),
            Some(_) => self.follow(&context, status).await,
        }
    }

    async fn cleanup(&self, context: Arc<Context>) -> Result<Action, Error> {
        cleanup_request(self, &context, false).await
    }
}

impl ImageScanningRequest {
    async fn start(
        &self,
        context: &Context,
        status: ImageScanningRequestStatus,
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
        let (_, tag_name) = parse_image_stream_tag(tag);

        let pod = scanning_pod(
            config,
            &coordinates.uid,
            &coordinates.owner(),
            &format!("{repository}:{tag_name}"),
        );
        if let Err(e) = apply_worker_object(&context.client, config, &pod).await {
            let message = format!("Error Occurred Creating Scanning Pod '{e}'");
            error!("{message}");
            return self
                .transition(context, status, Transition::InitializationFailed(message))
                .await;
        }

        let message = format!(
            "Scanning Pod Launched '{}/{}'",
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

    /// Wait for the scanning pod to serve its report, then collect it
    async fn follow(
        &self,
        context: &Context,
        mut status: ImageScanningRequestStatus,
    ) -> Result<Action, Error> {
        let coordinates = Coordinates::of(self)?;
        let owner = coordinates.owner();
        let target = &context.config.target_project;

        let Some(pod) = worker_pod(context, &coordinates.uid).await? else {
            let message = format!("Scanning Pod '{target}/{}' Not Found", coordinates.uid);
            warn!("{message}");
            return self
                .transition(context, status, Transition::Failed(message))
                .await;
        };

        match pod_phase(&pod) {
            Some("Failed") => {
                info!("Scanning Pod Failed. Updating ImageScanningRequest {owner}");
                self.transition(context, status, Transition::Failed("Scanning Pod Failed".into()))
                    .await
            }
            Some("Succeeded") => {
                let action = self
                    .transition(
                        context,
                        status,
                        Transition::Failed("Scanning Pod Exited Before Report Retrieval".into()),
                    )
                    .await?;
                discard_worker_pod(context, &coordinates.uid).await;
                Ok(action)
            }
            Some("Running") => {
                if !context.endpoint.healthy(&pod).await {
                    // image pulls don't count against the deadline
                    let started = running_since(&pod)
                        .or_else(|| pod.status.as_ref()?.start_time.as_ref().map(|t| t.0))
                        .or(status.execution.start_time)
                        .unwrap_or_else(Utc::now);
                    let elapsed = (Utc::now() - started).to_std().unwrap_or_default();

                    if elapsed < context.config.health_deadline() {
                        info!(
                            "Scanning Pod '{}' in Namespace '{target}' is Running. Waiting for Scan to Complete...",
                            coordinates.uid
                        );
                        return Ok(Action::requeue(context.config.poll_interval()));
                    }

                    info!("Scanning Health Check Could Not Be Validated. Updating ImageScanningRequest {owner}");
                    let action = self
                        .transition(
                            context,
                            status,
                            Transition::Failed("Health Check Validation Error".into()),
                        )
                        .await?;
                    discard_worker_pod(context, &coordinates.uid).await;
                    return Ok(action);
                }

                info!("Retrieving OpenSCAP Report");
                let transition = match context.endpoint.openscap_report(&pod).await {
                    Err(e) => {
                        error!("Failed to Retrieve OpenSCAP Report: {e}");
                        Transition::Failed("OpenSCAP Report Retrieval Failure".into())
                    }
                    Ok(report) => match ScanResult::from_report(&report) {
                        Err(e) => {
                            error!("Failed Unmarshalling OpenSCAP Report: {e}");
                            Transition::Failed("Failed Unmarshalling OpenSCAP Report".into())
                        }
                        Ok(result) => {
                            info!("Scanning Pod Succeeded. Updating ImageScanningRequest {owner}");
                            status.scan_result = Some(result);
                            Transition::Succeeded("Image Scanned".into())
                        }
                    },
                };

                let action = self.transition(context, status, transition).await?;
                discard_worker_pod(context, &coordinates.uid).await;
                Ok(action)
            }
            _ => Ok(Action::requeue(context.config.poll_interval())),
        }
    }

    async fn transition(
        &self,
        context: &Context,
        mut status: ImageScanningRequestStatus,
        transition: Transition,
    ) -> Result<Action, Error> {
        status.execution.record(&transition);
        if let Transition::Launched { image, .. } = &transition {
            status.scanned_image = Some(image.clone());
            status.scan_result = None;
        }

        patch_status(&context.client, self, &status).await?;

        Ok(match transition.phase() {
            ImageExecutionPhase::Running => Action::requeue(context.config.poll_interval()),
            _ => Action::await_change(),
        })
    }
}
