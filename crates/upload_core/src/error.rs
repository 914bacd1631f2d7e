use thiserror::Error;

use crate::validator::ValidationError;

pub const NO_RESPONSE_MESSAGE: &str = "No response from server. The segmentation is still processing. Please wait or try again in a few minutes.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiOperation {
    Upload,
    GetResult,
    GetStats,
    CancelJob,
    FetchArtifact,
}

impl ApiOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            ApiOperation::Upload => "upload_image",
            ApiOperation::GetResult => "get_result",
            ApiOperation::GetStats => "get_stats",
            ApiOperation::CancelJob => "cancel_job",
            ApiOperation::FetchArtifact => "fetch_artifact",
        }
    }

    /// Message used when the service fails without a usable `detail`.
    pub fn fallback_message(self) -> &'static str {
        match self {
            ApiOperation::Upload => "Server error occurred",
            ApiOperation::GetResult => "Failed to retrieve segmentation result",
            ApiOperation::GetStats => "Failed to retrieve segmentation statistics",
            ApiOperation::CancelJob => "Failed to cancel segmentation",
            ApiOperation::FetchArtifact => "Failed to download segmented image",
        }
    }
}

/// Every failure of an outbound call, normalized at the client boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiClientError {
    /// The service answered with a failure.
    #[error("{message}")]
    Server { status: Option<u16>, message: String },
    /// The request went out but nothing came back in time.
    #[error("{}", NO_RESPONSE_MESSAGE)]
    NoResponse,
    /// The request could not be built or its payload could not be read.
    #[error("{message}")]
    RequestSetup { message: String },
}

impl ApiClientError {
    pub fn server(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    pub fn request_setup(message: impl Into<String>) -> Self {
        Self::RequestSetup {
            message: message.into(),
        }
    }

    pub fn user_message(&self) -> String {
        self.to_string()
    }

    pub fn is_no_response(&self) -> bool {
        matches!(self, ApiClientError::NoResponse)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Please select a file first.")]
    NoFileSelected,
    #[error("an upload is already in progress")]
    AlreadyUploading,
    /// The session already holds a result; select a file to start over.
    #[error("This file has already been segmented. Select a file to upload again.")]
    AlreadySucceeded,
    #[error(transparent)]
    Api(#[from] ApiClientError),
}

#[derive(Debug, Error)]
#[error("Failed to download segmented image")]
pub struct DownloadError {
    #[source]
    source: anyhow::Error,
}

impl DownloadError {
    pub fn new(source: impl Into<anyhow::Error>) -> Self {
        Self {
            source: source.into(),
        }
    }
}
