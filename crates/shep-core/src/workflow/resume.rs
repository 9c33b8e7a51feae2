use serde::{Deserialize, Serialize};

use super::WorkflowState;
use crate::error::{Result, ShepError};

/// Human decision delivered to an interrupted node.
///
/// Wire shape: `{"approved": true}` or
/// `{"rejected": true, "feedback": "...", "iteration": 2}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePayload {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub approved: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub rejected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject { feedback: String, iteration: u32 },
}

impl ResumePayload {
    pub fn approve() -> Self {
        Self {
            approved: true,
            ..Default::default()
        }
    }

    pub fn reject(feedback: impl Into<String>, iteration: u32) -> Self {
        Self {
            rejected: true,
            feedback: Some(feedback.into()),
            iteration: Some(iteration),
            ..Default::default()
        }
    }

    pub fn parse(json: &str) -> Result<Self> {
        let payload: Self = serde_json::from_str(json)
            .map_err(|e| ShepError::InvalidResumePayload(e.to_string()))?;
        payload.decision()?;
        Ok(payload)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Exactly one of `approved` / `rejected` must be set.
    pub fn decision(&self) -> Result<Decision> {
        match (self.approved, self.rejected) {
            (true, false) => Ok(Decision::Approve),
            (false, true) => Ok(Decision::Reject {
                feedback: self.feedback.clone().unwrap_or_default(),
                iteration: self.iteration.unwrap_or(1),
            }),
            (true, true) => Err(ShepError::InvalidResumePayload(
                "both approved and rejected are set".into(),
            )),
            (false, false) => Err(ShepError::InvalidResumePayload(
                "one of approved or rejected is required".into(),
            )),
        }
    }
}

/// How a graph invocation begins.
#[derive(Debug, Clone)]
pub enum GraphCommand {
    /// Fresh thread with this initial state. On a thread that already has a
    /// checkpoint this behaves like [`GraphCommand::Continue`].
    Start(WorkflowState),
    /// Pick up from the latest checkpoint.
    Continue,
    /// Deliver a decision to the pending interrupt.
    Resume(ResumePayload),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_approval() {
        let p = ResumePayload::parse(r#"{"approved":true}"#).unwrap();
        assert_eq!(p.decision().unwrap(), Decision::Approve);
    }

    #[test]
    fn parses_rejection_with_feedback() {
        let p = ResumePayload::parse(r#"{"rejected":true,"feedback":"add error cases","iteration":2}"#)
            .unwrap();
        assert_eq!(
            p.decision().unwrap(),
            Decision::Reject {
                feedback: "add error cases".into(),
                iteration: 2
            }
        );
    }

    #[test]
    fn rejects_ambiguous_or_empty_payloads() {
        assert!(ResumePayload::parse(r#"{}"#).is_err());
        assert!(ResumePayload::parse(r#"{"approved":true,"rejected":true}"#).is_err());
        assert!(ResumePayload::parse("not json").is_err());
    }

    #[test]
    fn serializes_compactly() {
        assert_eq!(ResumePayload::approve().to_json().unwrap(), r#"{"approved":true}"#);
        let back = ResumePayload::parse(&ResumePayload::reject("x", 3).to_json().unwrap()).unwrap();
        assert_eq!(back, ResumePayload::reject("x", 3));
    }
}
