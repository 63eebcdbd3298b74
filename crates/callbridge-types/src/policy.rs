//! Confidence and tool policy configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What to do when the best retrieved passage scores below the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatingAction {
    /// Ask the caller to rephrase or narrow the question.
    #[default]
    AskClarify,
    /// Hand the caller to a human.
    Transfer,
    /// Offer to record a message.
    Voicemail,
}

impl GatingAction {
    pub fn label(self) -> &'static str {
        match self {
            Self::AskClarify => "ask_clarify",
            Self::Transfer => "transfer",
            Self::Voicemail => "voicemail",
        }
    }
}

/// Policy deciding whether a retrieved passage may be spoken as fact.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidencePolicy {
    /// Minimum top-candidate score for an answer to be asserted.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    /// Action taken below the threshold.
    #[serde(default)]
    pub low_confidence_action: GatingAction,
}

fn default_min_confidence() -> f32 {
    0.55
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            low_confidence_action: GatingAction::AskClarify,
        }
    }
}

impl ConfidencePolicy {
    /// Returns `true` if `score` clears the threshold.
    pub fn passes(&self, score: f32) -> bool {
        score >= self.min_confidence
    }

    /// Checks that the threshold is a finite value in `[0, 1]`.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if !self.min_confidence.is_finite() || !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(PolicyError::ThresholdOutOfRange(self.min_confidence));
        }
        Ok(())
    }
}

/// Read-mostly policy shared by all concurrent calls.
///
/// Calls take a snapshot when their model session connects; an admin update
/// only affects calls that connect afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServicePolicy {
    #[serde(default)]
    pub confidence: ConfidencePolicy,
    /// Tools offered to the model. Empty means every registered tool.
    #[serde(default)]
    pub enabled_tools: Vec<String>,
}

impl ServicePolicy {
    /// Returns `true` if the named tool may be offered and dispatched.
    pub fn tool_enabled(&self, name: &str) -> bool {
        self.enabled_tools.is_empty() || self.enabled_tools.iter().any(|t| t == name)
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        self.confidence.validate()
    }
}

/// Errors raised when validating a policy update.
#[derive(Debug, Error, PartialEq)]
pub enum PolicyError {
    #[error("min_confidence must be within [0, 1], got {0}")]
    ThresholdOutOfRange(f32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_values() {
        let policy = ServicePolicy::default();
        assert_eq!(policy.confidence.min_confidence, 0.55);
        assert_eq!(
            policy.confidence.low_confidence_action,
            GatingAction::AskClarify
        );
        assert!(policy.tool_enabled("anything"));
    }

    #[test]
    fn threshold_is_inclusive() {
        let policy = ConfidencePolicy::default();
        assert!(policy.passes(0.55));
        assert!(!policy.passes(0.5499));
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let policy = ConfidencePolicy {
            min_confidence: 1.2,
            ..Default::default()
        };
        assert_eq!(
            policy.validate(),
            Err(PolicyError::ThresholdOutOfRange(1.2))
        );
        let nan = ConfidencePolicy {
            min_confidence: f32::NAN,
            ..Default::default()
        };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn enabled_tools_filter() {
        let policy = ServicePolicy {
            enabled_tools: vec!["answer_question".to_string()],
            ..Default::default()
        };
        assert!(policy.tool_enabled("answer_question"));
        assert!(!policy.tool_enabled("purchase_tickets"));
    }

    #[test]
    fn gating_action_wire_names() {
        let json = r#"{"min_confidence":0.7,"low_confidence_action":"voicemail"}"#;
        let policy: ConfidencePolicy = serde_json::from_str(json).unwrap();
        assert_eq!(policy.low_confidence_action, GatingAction::Voicemail);
        assert_eq!(policy.min_confidence, 0.7);
    }
}
