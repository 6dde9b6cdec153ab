use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Name of the first step of every report
pub const CONNECTIVITY_STEP: &str = "connectivity";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Warning,
    Error,
}

/// Outcome of a single readiness check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationStep {
    pub step: String,
    pub status: StepStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl ValidationStep {
    pub fn success(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            status: StepStatus::Success,
            message: message.into(),
            remediation: None,
        }
    }

    pub fn warning(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            status: StepStatus::Warning,
            message: message.into(),
            remediation: None,
        }
    }

    pub fn error(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            status: StepStatus::Error,
            message: message.into(),
            remediation: None,
        }
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.status == StepStatus::Error
    }
}

/// Readiness of a source for change capture.
///
/// `ready` is derived from the steps and cannot be set independently.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    ready: bool,
    steps: Vec<ValidationStep>,
}

impl ValidationReport {
    pub fn from_steps(steps: Vec<ValidationStep>) -> Self {
        let ready = !steps.iter().any(ValidationStep::is_error);
        Self { ready, steps }
    }

    /// Report for a source that could not be reached: every later check is
    /// reported as skipped.
    pub fn unreachable(reason: impl Into<String>, later_steps: &[&str]) -> Self {
        let mut steps = vec![ValidationStep::error(CONNECTIVITY_STEP, reason)
            .with_remediation("Check host, port, credentials and that the database is running")];
        steps.extend(later_steps.iter().map(|name| {
            ValidationStep::error(*name, "Skipped: the database could not be reached")
        }));
        Self::from_steps(steps)
    }

    pub fn ready(&self) -> bool {
        self.ready
    }

    pub fn steps(&self) -> &[ValidationStep] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&ValidationStep> {
        self.steps.iter().find(|s| s.step == name)
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &ValidationStep> {
        self.steps.iter().filter(|s| s.is_error())
    }

    pub fn failed_step_names(&self) -> Vec<String> {
        self.failed_steps().map(|s| s.step.clone()).collect()
    }

    /// Turn still-failing steps whose fix only takes effect after a database
    /// restart into warnings.
    pub fn with_pending_restarts(self, pending: &HashSet<String>) -> Self {
        let steps = self
            .steps
            .into_iter()
            .map(|step| {
                if step.is_error() && pending.contains(&step.step) {
                    ValidationStep {
                        status: StepStatus::Warning,
                        message: format!(
                            "{} (new setting applied; restart the database server for it to take effect)",
                            step.message
                        ),
                        remediation: Some("Restart the database server".to_string()),
                        step: step.step,
                    }
                } else {
                    step
                }
            })
            .collect();
        Self::from_steps(steps)
    }
}

/// Readiness state of a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    #[default]
    Unvalidated,
    Ready,
    NotReady,
}

impl From<&ValidationReport> for ReadinessState {
    fn from(report: &ValidationReport) -> Self {
        if report.ready() {
            Self::Ready
        } else {
            Self::NotReady
        }
    }
}
