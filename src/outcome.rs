//! Verification outcomes handed back to the calling scenario

use crate::{Error, Result};
use serde::Serialize;
use std::fmt::Debug;

/// Pass/fail record of one verification, with everything that was observed.
///
/// Failures are returned as data rather than raised so that cleanup (closing
/// a spawned context, restoring the origin) can run before the caller decides
/// how to report. Use `into_result` to turn a failure into an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationOutcome<V = String> {
    pub success: bool,
    pub diagnostic: String,
    pub captured_before: Vec<V>,
    pub captured_after: Vec<V>,
    /// Expected sequence, when the verification computed one
    pub expected: Vec<V>,
}

impl<V> VerificationOutcome<V> {
    pub fn pass(diagnostic: impl Into<String>) -> Self {
        Self {
            success: true,
            diagnostic: diagnostic.into(),
            captured_before: Vec::new(),
            captured_after: Vec::new(),
            expected: Vec::new(),
        }
    }

    pub fn fail(diagnostic: impl Into<String>) -> Self {
        Self {
            success: false,
            ..Self::pass(diagnostic)
        }
    }

    /// Attach the observed sequences.
    pub fn with_sequences(mut self, before: Vec<V>, after: Vec<V>) -> Self {
        self.captured_before = before;
        self.captured_after = after;
        self
    }

    pub fn with_expected(mut self, expected: Vec<V>) -> Self {
        self.expected = expected;
        self
    }
}

impl<V: Debug> VerificationOutcome<V> {
    /// `Ok(self)` on success, `Error::VerificationFailure` otherwise.
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            return Ok(self);
        }
        Err(Error::VerificationFailure {
            diagnostic: self.diagnostic,
            before: self.captured_before.iter().map(|v| format!("{:?}", v)).collect(),
            after: self.captured_after.iter().map(|v| format!("{:?}", v)).collect(),
        })
    }
}
