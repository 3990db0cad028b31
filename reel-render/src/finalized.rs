//! The only way a sequence reaches a compositor

use crate::{Error, Result};
use reel_core::Sequence;

/// A sequence known to be sorted, contiguous, positive and free of a
/// duplicated boundary segment
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedSequence {
    sequence: Sequence,
    expected_total: Option<f64>,
}

impl FinalizedSequence {
    /// Checks every invariant.
    ///
    /// Structural violations are refused. Drift from the narration total is
    /// only logged.
    pub fn new(sequence: Sequence, expected_total: Option<f64>, tolerance: f64) -> Result<Self> {
        if sequence.is_empty() {
            return Err(Error::EmptySequence);
        }

        let (structural, drift): (Vec<_>, Vec<_>) = sequence
            .violations(expected_total, tolerance)
            .into_iter()
            .partition(|v| v.is_structural());

        if !structural.is_empty() {
            tracing::error!(violations = structural.len(), "refusing sequence");
            return Err(Error::Invariant(structural));
        }
        for violation in &drift {
            tracing::warn!("{violation}");
        }

        Ok(Self {
            sequence,
            expected_total,
        })
    }

    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    pub fn into_inner(self) -> Sequence {
        self.sequence
    }

    pub fn expected_total(&self) -> Option<f64> {
        self.expected_total
    }

    /// Sum of entry durations
    pub fn total_duration(&self) -> f64 {
        self.sequence.total_duration()
    }

    pub fn drift(&self) -> Option<f64> {
        self.expected_total
            .map(|expected| self.total_duration() - expected)
    }
}
