//! Local file checks that run before any state change or network call.

use shared::domain::{is_accepted_extension, ACCEPTED_EXTENSIONS, DEFAULT_MAX_FILE_SIZE};
use thiserror::Error;

use crate::candidate::CandidateFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    OversizeFile,
    UnsupportedType,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{detail}")]
pub struct ValidationError {
    pub reason: RejectionReason,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Accepted(CandidateFile),
    Rejected(ValidationError),
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationOutcome::Accepted(_))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Validator {
    max_file_size: u64,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FILE_SIZE)
    }
}

impl Validator {
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Size is checked before type, so an oversize file is always `OversizeFile`.
    pub fn validate(&self, candidate: CandidateFile) -> ValidationOutcome {
        if candidate.byte_size() > self.max_file_size {
            return ValidationOutcome::Rejected(ValidationError {
                reason: RejectionReason::OversizeFile,
                detail: format!(
                    "File size exceeds the maximum limit ({}MB).",
                    format_megabytes(self.max_file_size)
                ),
            });
        }

        if !is_accepted_extension(candidate.extension()) {
            return ValidationOutcome::Rejected(ValidationError {
                reason: RejectionReason::UnsupportedType,
                detail: format!(
                    "Invalid file type. Accepted formats: {}",
                    ACCEPTED_EXTENSIONS.join(", ")
                ),
            });
        }

        ValidationOutcome::Accepted(candidate)
    }
}

fn format_megabytes(bytes: u64) -> String {
    let megabytes = bytes as f64 / 1024.0 / 1024.0;
    let formatted = format!("{megabytes:.2}");
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

#[cfg(test)]
#[path = "tests/validator_tests.rs"]
mod tests;
