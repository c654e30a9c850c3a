use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

mod image_stream;
mod scanning;
mod signing;

pub use image_stream::*;
pub use scanning::*;
pub use signing::*;

/// API group shared by both request kinds
pub const GROUP: &str = "cop.redhat.com";

/// Annotation on worker pods naming the owning request as `namespace/name`
pub const OWNER_ANNOTATION: &str = "cop.redhat.com/owner";

/// Annotation on worker pods naming the kind of work they perform
pub const TYPE_ANNOTATION: &str = "cop.redhat.com/type";

/// The possible phases of a signing or scanning request.
///
/// A request without a phase has not been started yet.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum ImageExecutionPhase {
    /// A worker pod has been launched and is being followed
    Running,

    /// The worker finished and its result has been recorded
    Completed,

    /// The request could not be carried out
    Failed,
}

impl ImageExecutionPhase {
    /// Whether no further work will be done for a request in this phase
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// The stage of a request a condition reports on
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum ImageExecutionConditionType {
    Initialization,
    Signing,
    Finished,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
}

/// A single entry in the history of a request
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageExecutionCondition {
    #[serde(rename = "type")]
    pub type_: ImageExecutionConditionType,
    pub status: ConditionStatus,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl ImageExecutionCondition {
    pub fn new(
        type_: ImageExecutionConditionType,
        status: ConditionStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_,
            status,
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

/// Everything the controllers need to record a step of a request.
///
/// Each variant maps onto exactly one condition and one phase.
#[derive(Clone, Debug, PartialEq)]
pub enum Transition {
    /// The request could not be started
    InitializationFailed(String),

    /// The worker pod is up; carries the digest of the image being worked on
    Launched { message: String, image: String },

    /// The worker succeeded
    Succeeded(String),

    /// The worker (or the follow-up checks) failed
    Failed(String),
}

impl Transition {
    pub fn phase(&self) -> ImageExecutionPhase {
        match self {
            Transition::Launched { .. } => ImageExecutionPhase::Running,
            Transition::Succeeded(_) => ImageExecutionPhase::Completed,
            Transition::InitializationFailed(_) | Transition::Failed(_) => {
                ImageExecutionPhase::Failed
            }
        }
    }

    pub fn condition(&self) -> ImageExecutionCondition {
        use ConditionStatus::*;
        use ImageExecutionConditionType::*;

        match self {
            Transition::InitializationFailed(m) => {
                ImageExecutionCondition::new(Initialization, False, m)
            }
            Transition::Launched { message, .. } => {
                ImageExecutionCondition::new(Initialization, True, message)
            }
            Transition::Succeeded(m) => ImageExecutionCondition::new(Finished, True, m),
            Transition::Failed(m) => ImageExecutionCondition::new(Finished, False, m),
        }
    }
}

/// Bookkeeping shared by both request statuses
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatus {
    /// Current phase; absent until the request has been picked up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<ImageExecutionPhase>,

    /// Every step the request went through, oldest first
    #[serde(default)]
    pub conditions: Vec<ImageExecutionCondition>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl ExecutionStatus {
    /// Record a transition, returning the condition that was appended
    pub fn record(&mut self, transition: &Transition) -> &ImageExecutionCondition {
        let condition = transition.condition();
        let now = condition.last_transition_time;

        match transition {
            Transition::InitializationFailed(_) => {
                self.start_time = Some(now);
                self.end_time = Some(now);
            }
            Transition::Launched { .. } => {
                self.start_time = Some(now);
                self.end_time = None;
            }
            Transition::Succeeded(_) | Transition::Failed(_) => self.end_time = Some(now),
        }

        self.phase = Some(transition.phase());
        self.conditions.push(condition);
        self.conditions.last().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialization_failures_open_and_close_the_request() {
        let mut status = ExecutionStatus::default();
        status.record(&Transition::InitializationFailed("nope".into()));

        assert_eq!(status.phase, Some(ImageExecutionPhase::Failed));
        assert!(status.start_time.is_some());
        assert_eq!(status.start_time, status.end_time);
        assert_eq!(
            status.conditions[0].type_,
            ImageExecutionConditionType::Initialization
        );
        assert_eq!(status.conditions[0].status, ConditionStatus::False);
    }

    #[test]
    fn conditions_accumulate_across_transitions() {
        let mut status = ExecutionStatus::default();
        status.record(&Transition::Launched {
            message: "launched".into(),
            image: "sha256:abc".into(),
        });
        assert_eq!(status.phase, Some(ImageExecutionPhase::Running));
        assert!(status.end_time.is_none());

        let condition = status.record(&Transition::Succeeded("done".into())).clone();
        assert_eq!(condition.type_, ImageExecutionConditionType::Finished);
        assert_eq!(condition.status, ConditionStatus::True);

        assert_eq!(status.phase, Some(ImageExecutionPhase::Completed));
        assert_eq!(status.conditions.len(), 2);
        assert!(status.end_time.is_some());
        assert!(status.phase.unwrap().is_finished());
    }

    #[test]
    fn conditions_serialize_with_kubernetes_field_names() {
        let condition = ImageExecutionCondition::new(
            ImageExecutionConditionType::Finished,
            ConditionStatus::False,
            "Signing Pod Failed",
        );
        let value = serde_json::to_value(&condition).unwrap();

        assert_eq!(value["type"], "Finished");
        assert_eq!(value["status"], "False");
        assert_eq!(value["message"], "Signing Pod Failed");
        assert!(value["lastTransitionTime"].is_string());
    }
}
