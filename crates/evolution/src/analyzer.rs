//! Decides whether a genome is underperforming.

use std::fmt;

use genesis_core::ExecutorKind;

/// Why an evolution was triggered.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    /// Kind the trigger applies to
    pub kind: ExecutorKind,
    /// Explicit feedback text, if any
    pub feedback: Option<String>,
    /// Success rate over the window, if enough samples exist
    pub success_rate: Option<f64>,
    /// Threshold the rate was compared against
    pub threshold: f64,
}

impl Trigger {
    /// Trigger requested by an operator, with no quality signal.
    pub fn manual(kind: ExecutorKind) -> Self {
        Self {
            kind,
            feedback: None,
            success_rate: None,
            threshold: 0.0,
        }
    }

    /// True if the trigger came from explicit feedback.
    pub fn is_feedback(&self) -> bool {
        self.feedback.is_some()
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.feedback, self.success_rate) {
            (Some(text), _) => write!(f, "feedback: {}", text),
            (None, Some(rate)) => write!(f, "success rate {:.2} below {:.2}", rate, self.threshold),
            (None, None) => write!(f, "manual"),
        }
    }
}

/// Turns quality signals into triggers.
#[derive(Debug, Clone)]
pub struct Analyzer {
    threshold: f64,
}

impl Analyzer {
    /// Analyzer firing when the success rate drops below `threshold`.
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Assess one kind.
    ///
    /// Feedback always triggers; otherwise the rate must be known and
    /// strictly below the threshold.
    pub fn assess(&self, kind: ExecutorKind, feedback: Option<&str>, success_rate: Option<f64>) -> Option<Trigger> {
        let feedback = feedback.map(str::trim).filter(|f| !f.is_empty()).map(str::to_string);
        let underperforming = success_rate.map_or(false, |rate| rate < self.threshold);

        if feedback.is_none() && !underperforming {
            return None;
        }
        Some(Trigger {
            kind,
            feedback,
            success_rate,
            threshold: self.threshold,
        })
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new(0.5)
    }
}
