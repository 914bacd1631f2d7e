//! reqwest-backed client for the remote segmentation service.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::{
    multipart::{Form, Part},
    Body, Client, Response,
};
use serde::de::DeserializeOwned;
use shared::{
    domain::JobId,
    error::ErrorBody,
    protocol::{Acknowledgement, SegmentationResult, StatsRecord},
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    candidate::CandidateFile,
    config::Settings,
    error::{ApiClientError, ApiOperation},
    progress::{ProgressSender, TransferProgress},
    SegmentationApi,
};

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;
const MULTIPART_FIELD: &str = "file";

pub struct SegmentationClient {
    http: Client,
    base_url: Url,
    artifact_base_url: String,
}

impl SegmentationClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, ApiClientError> {
        Self::with_artifact_base(base_url, base_url, request_timeout)
    }

    pub fn with_artifact_base(
        base_url: &str,
        artifact_base_url: &str,
        request_timeout: Duration,
    ) -> Result<Self, ApiClientError> {
        let base_url = Url::parse(base_url.trim()).map_err(|e| {
            ApiClientError::request_setup(format!("invalid service base url '{base_url}': {e}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ApiClientError::request_setup(format!(
                "service base url '{base_url}' cannot carry a path"
            )));
        }
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ApiClientError::request_setup(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            artifact_base_url: artifact_base_url.trim().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ApiClientError> {
        Self::with_artifact_base(
            &settings.api_base_url,
            settings.artifact_base_url(),
            settings.request_timeout(),
        )
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

#[async_trait]
impl SegmentationApi for SegmentationClient {
    async fn upload_image(
        &self,
        file: &CandidateFile,
        progress: ProgressSender,
    ) -> Result<SegmentationResult, ApiClientError> {
        let contents = file.read_contents().await.map_err(|e| {
            ApiClientError::request_setup(format!("failed to read '{}': {e}", file.name()))
        })?;
        let total = contents.len() as u64;
        let part = Part::stream_with_length(progress_body(contents, progress), total)
            .file_name(file.name().to_string())
            .mime_str(&file.mime_type())
            .map_err(|e| ApiClientError::request_setup(format!("invalid file content type: {e}")))?;
        let form = Form::new().part(MULTIPART_FIELD, part);

        let url = self.endpoint(&["segmentation"]);
        debug!(%url, file = file.name(), bytes = total, "posting segmentation upload");
        let response = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error(ApiOperation::Upload, e))?;

        let result = decode_result(response, ApiOperation::Upload).await?;
        info!(
            job_id = %result.job_id,
            processing_time_seconds = result.processing_time_seconds,
            "segmentation service accepted upload"
        );
        Ok(result)
    }

    async fn get_result(&self, job_id: &JobId) -> Result<SegmentationResult, ApiClientError> {
        let url = self.endpoint(&["segmentation", job_id.as_str()]);
        debug!(%url, "fetching segmentation result");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(ApiOperation::GetResult, e))?;
        decode_result(response, ApiOperation::GetResult).await
    }

    async fn get_stats(&self) -> Result<StatsRecord, ApiClientError> {
        let url = self.endpoint(&["segmentation", "stats"]);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(ApiOperation::GetStats, e))?;
        decode_json(response, ApiOperation::GetStats).await
    }

    async fn cancel_job(&self, job_id: &JobId) -> Result<Acknowledgement, ApiClientError> {
        let url = self.endpoint(&["segmentation", job_id.as_str(), "cancel"]);
        debug!(%url, "requesting segmentation cancel");
        let response = self
            .http
            .post(url)
            .send()
            .await
            .map_err(|e| transport_error(ApiOperation::CancelJob, e))?;
        decode_json(response, ApiOperation::CancelJob).await
    }

    async fn fetch_artifact(&self, relative_url: &str) -> Result<Bytes, ApiClientError> {
        let url = self.artifact_url(relative_url);
        debug!(%url, "fetching segmented artifact");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error(ApiOperation::FetchArtifact, e))?;
        read_success_body(response, ApiOperation::FetchArtifact).await
    }

    fn artifact_url(&self, relative_url: &str) -> String {
        if relative_url.starts_with("http://") || relative_url.starts_with("https://") {
            return relative_url.to_string();
        }
        format!(
            "{}/{}",
            self.artifact_base_url,
            relative_url.trim_start_matches('/')
        )
    }
}

/// Streams `contents` in chunks, reporting cumulative bytes as each one is handed to the transport.
fn progress_body(contents: Bytes, progress: ProgressSender) -> Body {
    let total = contents.len() as u64;
    let chunks: Vec<Bytes> = (0..contents.len())
        .step_by(UPLOAD_CHUNK_SIZE)
        .map(|start| contents.slice(start..(start + UPLOAD_CHUNK_SIZE).min(contents.len())))
        .collect();
    let mut sent = 0u64;
    let stream = futures::stream::iter(chunks).map(move |chunk| {
        sent += chunk.len() as u64;
        // The receiver is gone once the controller has a final outcome.
        let _ = progress.send(TransferProgress { sent, total });
        Ok::<Bytes, std::io::Error>(chunk)
    });
    Body::wrap_stream(stream)
}

fn transport_error(operation: ApiOperation, err: reqwest::Error) -> ApiClientError {
    if err.is_builder() {
        warn!(operation = operation.as_str(), error = %err, "request setup failed");
        return ApiClientError::request_setup(err.to_string());
    }
    warn!(
        operation = operation.as_str(),
        timeout = err.is_timeout(),
        connect = err.is_connect(),
        error = %err,
        "no response from segmentation service"
    );
    ApiClientError::NoResponse
}

async fn read_success_body(
    response: Response,
    operation: ApiOperation,
) -> Result<Bytes, ApiClientError> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| transport_error(operation, e))?;

    if !status.is_success() {
        let message = ErrorBody::detail_from_bytes(&body)
            .unwrap_or_else(|| operation.fallback_message().to_string());
        warn!(
            operation = operation.as_str(),
            status = status.as_u16(),
            %message,
            "segmentation service returned an error"
        );
        return Err(ApiClientError::server(Some(status.as_u16()), message));
    }

    Ok(body)
}

async fn decode_json<T: DeserializeOwned>(
    response: Response,
    operation: ApiOperation,
) -> Result<T, ApiClientError> {
    let status = response.status().as_u16();
    let body = read_success_body(response, operation).await?;
    serde_json::from_slice(&body).map_err(|e| {
        warn!(operation = operation.as_str(), error = %e, "malformed response body");
        ApiClientError::server(
            Some(status),
            format!("{}: malformed response body", operation.fallback_message()),
        )
    })
}

async fn decode_result(
    response: Response,
    operation: ApiOperation,
) -> Result<SegmentationResult, ApiClientError> {
    let status = response.status().as_u16();
    let result: SegmentationResult = decode_json(response, operation).await?;
    result
        .validate()
        .map_err(|e| ApiClientError::server(Some(status), e.to_string()))
}

#[cfg(test)]
#[path = "tests/client_tests.rs"]
mod tests;
