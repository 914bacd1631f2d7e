use serde::{Deserialize, Serialize};

use crate::{domain::JobId, error::ResultValidationError};

/// Success body of `POST /segmentation` and `GET /segmentation/{job_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationResult {
    pub job_id: JobId,
    pub original_filename: String,
    pub segmented_image_url: String,
    pub processing_time_seconds: f64,
}

impl SegmentationResult {
    pub fn validate(self) -> Result<Self, ResultValidationError> {
        if !self.processing_time_seconds.is_finite() || self.processing_time_seconds < 0.0 {
            return Err(ResultValidationError::new(format!(
                "processing_time_seconds must be a non-negative number, got {}",
                self.processing_time_seconds
            )));
        }
        if self.segmented_image_url.trim().is_empty() {
            return Err(ResultValidationError::new(
                "segmented_image_url must not be empty",
            ));
        }
        Ok(self)
    }
}

/// Aggregate statistics body; its shape is owned by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatsRecord(pub serde_json::Value);

/// Acknowledgement body of `POST /segmentation/{job_id}/cancel`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Acknowledgement(pub serde_json::Value);
