use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use shared::protocol::SegmentationResult;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{error::DownloadError, SegmentationApi};

const DOWNLOAD_PREFIX: &str = "segmented_";

/// Display and download surface for one completed result.
pub struct ResultRenderer {
    api: Arc<dyn SegmentationApi>,
    result: SegmentationResult,
    downloading: bool,
}

impl ResultRenderer {
    pub fn new(api: Arc<dyn SegmentationApi>, result: SegmentationResult) -> Self {
        Self {
            api,
            result,
            downloading: false,
        }
    }

    pub fn result(&self) -> &SegmentationResult {
        &self.result
    }

    pub fn is_downloading(&self) -> bool {
        self.downloading
    }

    /// `segmented_<original filename>`, stripped of any directory components.
    pub fn download_name(&self) -> String {
        let original = Path::new(&self.result.original_filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.png", self.result.job_id));
        format!("{DOWNLOAD_PREFIX}{original}")
    }

    pub fn view_url(&self) -> String {
        self.api.artifact_url(&self.result.segmented_image_url)
    }

    pub fn summary(&self) -> ResultSummary<'_> {
        ResultSummary {
            result: &self.result,
        }
    }

    /// Starts saving the artifact into `destination_dir` and returns without waiting.
    ///
    /// The busy flag only covers initiation; the returned handle resolves when the
    /// file is written. Must be called inside a tokio runtime.
    pub fn download(
        &mut self,
        destination_dir: &Path,
    ) -> JoinHandle<Result<PathBuf, DownloadError>> {
        self.downloading = true;

        let api = Arc::clone(&self.api);
        let relative_url = self.result.segmented_image_url.clone();
        let target = destination_dir.join(self.download_name());
        let handle = tokio::spawn(async move {
            let bytes = api.fetch_artifact(&relative_url).await.map_err(|err| {
                warn!(url = %relative_url, error = %err, "artifact download failed");
                DownloadError::new(err)
            })?;
            tokio::fs::write(&target, &bytes)
                .await
                .with_context(|| format!("failed to write '{}'", target.display()))
                .map_err(|err| {
                    warn!(error = %err, "artifact save failed");
                    DownloadError::new(err)
                })?;
            info!(path = %target.display(), bytes = bytes.len(), "segmented image saved");
            Ok::<PathBuf, DownloadError>(target)
        });

        self.downloading = false;
        handle
    }
}

pub struct ResultSummary<'a> {
    result: &'a SegmentationResult,
}

impl fmt::Display for ResultSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Segmentation Results")?;
        writeln!(
            f,
            "Processing time: {:.2}s | Job ID: {}",
            self.result.processing_time_seconds, self.result.job_id
        )?;
        write!(f, "Original filename: {}", self.result.original_filename)
    }
}

#[cfg(test)]
#[path = "tests/renderer_tests.rs"]
mod tests;
