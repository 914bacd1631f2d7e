//! Client-side workflow for submitting one raster image to a remote segmentation
//! service: validation, the upload state machine, the HTTP client, and the result view.

use async_trait::async_trait;
use bytes::Bytes;
use shared::{
    domain::JobId,
    protocol::{Acknowledgement, SegmentationResult, StatsRecord},
};

pub mod candidate;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod progress;
pub mod renderer;
pub mod validator;

pub use candidate::{CandidateFile, FileContents};
pub use client::SegmentationClient;
pub use config::{load_settings, Settings};
pub use controller::{ControllerConfig, UploadController, UploadSession, UploadStatus};
pub use error::{ApiClientError, DownloadError, UploadError};
pub use progress::{ProgressSender, TransferProgress};
pub use renderer::ResultRenderer;
pub use validator::{RejectionReason, ValidationError, ValidationOutcome, Validator};

/// Operations offered by the remote segmentation service.
#[async_trait]
pub trait SegmentationApi: Send + Sync {
    /// Sends `file` as the multipart field `file`, reporting bytes handed to the transport.
    async fn upload_image(
        &self,
        file: &CandidateFile,
        progress: ProgressSender,
    ) -> Result<SegmentationResult, ApiClientError>;
    async fn get_result(&self, job_id: &JobId) -> Result<SegmentationResult, ApiClientError>;
    async fn get_stats(&self) -> Result<StatsRecord, ApiClientError>;
    /// Advisory only; an upload already in flight still runs to completion.
    async fn cancel_job(&self, job_id: &JobId) -> Result<Acknowledgement, ApiClientError>;
    async fn fetch_artifact(&self, relative_url: &str) -> Result<Bytes, ApiClientError>;
    fn artifact_url(&self, relative_url: &str) -> String;
}
