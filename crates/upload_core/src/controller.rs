//! Upload state machine: the only writer of [`UploadSession`].
//!
//! Progress during an upload comes from two places: transport events sent by the
//! [`SegmentationApi`] while the body streams out, and a heartbeat timer that keeps the
//! bar moving when the transport is quiet. Both are merged with `max`, so neither can
//! lower the value, and neither can reach 100 before the response is in hand. The
//! response is polled first on every wakeup and the heartbeat is dropped before the
//! terminal transition, so a late tick never touches a finished session.

use std::{sync::Arc, time::Duration};

use shared::{domain::DEFAULT_MAX_FILE_SIZE, protocol::SegmentationResult};
use tokio::{
    sync::watch,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
    candidate::CandidateFile,
    error::UploadError,
    progress::{heartbeat_advance, progress_channel, reconcile_transport, COMPLETE},
    validator::{ValidationOutcome, Validator},
    SegmentationApi,
};

const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1);

pub const INTERRUPTED_MESSAGE: &str = "Upload was interrupted before the server responded. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadStatus {
    #[default]
    Idle,
    Selected,
    Uploading,
    Succeeded,
    Failed,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadStatus::Succeeded | UploadStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UploadSession {
    status: UploadStatus,
    progress_percent: u8,
    error_message: Option<String>,
    file: Option<CandidateFile>,
    result: Option<SegmentationResult>,
}

impl UploadSession {
    pub fn status(&self) -> UploadStatus {
        self.status
    }

    pub fn progress_percent(&self) -> u8 {
        self.progress_percent
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn file(&self) -> Option<&CandidateFile> {
        self.file.as_ref()
    }

    pub fn result(&self) -> Option<&SegmentationResult> {
        self.result.as_ref()
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub max_file_size: u64,
    pub heartbeat_interval: Duration,
    pub heartbeat_step: u8,
    pub heartbeat_ceiling: u8,
    /// How long the 100% state stays visible before `begin_upload` returns.
    pub completion_grace: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            heartbeat_interval: Duration::from_millis(500),
            heartbeat_step: 10,
            heartbeat_ceiling: 90,
            completion_grace: Duration::from_millis(500),
        }
    }
}

pub struct UploadController {
    api: Arc<dyn SegmentationApi>,
    validator: Validator,
    config: ControllerConfig,
    session: UploadSession,
    snapshots: watch::Sender<UploadSession>,
}

impl UploadController {
    pub fn new(api: Arc<dyn SegmentationApi>, config: ControllerConfig) -> Self {
        let (snapshots, _) = watch::channel(UploadSession::default());
        Self {
            api,
            validator: Validator::new(config.max_file_size),
            config,
            session: UploadSession::default(),
            snapshots,
        }
    }

    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    /// Snapshots published at every transition, for read-only observers.
    pub fn subscribe(&self) -> watch::Receiver<UploadSession> {
        self.snapshots.subscribe()
    }

    pub fn select_file(&mut self, candidate: CandidateFile) -> Result<(), UploadError> {
        if self.session.status == UploadStatus::Uploading {
            warn!(file = candidate.name(), "file selection refused while uploading");
            return Err(UploadError::AlreadyUploading);
        }

        match self.validator.validate(candidate) {
            ValidationOutcome::Rejected(err) => {
                info!(reason = ?err.reason, detail = %err.detail, "file rejected");
                self.session = UploadSession {
                    error_message: Some(err.detail.clone()),
                    ..UploadSession::default()
                };
                self.publish();
                Err(UploadError::Validation(err))
            }
            ValidationOutcome::Accepted(file) => {
                info!(file = file.name(), bytes = file.byte_size(), "file selected");
                self.session = UploadSession {
                    status: UploadStatus::Selected,
                    file: Some(file),
                    ..UploadSession::default()
                };
                self.publish();
                Ok(())
            }
        }
    }

    /// Uploads the selected file and drives the session to a terminal status.
    ///
    /// Also accepted from `Failed`, which retries the kept file.
    pub async fn begin_upload(&mut self) -> Result<SegmentationResult, UploadError> {
        match self.session.status {
            UploadStatus::Uploading => {
                warn!("upload already in flight; ignoring begin_upload");
                return Err(UploadError::AlreadyUploading);
            }
            UploadStatus::Idle => {
                self.session.error_message = Some(UploadError::NoFileSelected.to_string());
                self.publish();
                return Err(UploadError::NoFileSelected);
            }
            UploadStatus::Succeeded => {
                debug!("begin_upload after success; a new selection is required");
                return Err(UploadError::AlreadySucceeded);
            }
            UploadStatus::Selected | UploadStatus::Failed => {}
        }
        let Some(file) = self.session.file.clone() else {
            return Err(UploadError::NoFileSelected);
        };

        self.session.status = UploadStatus::Uploading;
        self.session.progress_percent = 0;
        self.session.error_message = None;
        self.session.result = None;
        self.publish();
        info!(file = file.name(), bytes = file.byte_size(), "upload started");

        let api = Arc::clone(&self.api);
        let mut in_flight = InFlight {
            controller: self,
            settled: false,
        };
        let (progress_tx, mut progress_rx) = progress_channel();
        let request = api.upload_image(&file, progress_tx);
        tokio::pin!(request);

        let config = in_flight.controller.config.clone();
        let period = config.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL);
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut transport_open = true;

        let outcome = loop {
            tokio::select! {
                biased;
                outcome = &mut request => break outcome,
                event = progress_rx.recv(), if transport_open => match event {
                    Some(event) => {
                        let current = in_flight.controller.session.progress_percent;
                        in_flight
                            .controller
                            .advance_progress(reconcile_transport(current, event));
                    }
                    None => transport_open = false,
                },
                _ = heartbeat.tick() => {
                    let current = in_flight.controller.session.progress_percent;
                    in_flight.controller.advance_progress(heartbeat_advance(
                        current,
                        config.heartbeat_step,
                        config.heartbeat_ceiling,
                    ));
                }
            }
        };
        drop(heartbeat);
        drop(progress_rx);
        in_flight.settled = true;

        let controller = &mut *in_flight.controller;
        match outcome {
            Ok(result) => {
                controller.session.progress_percent = COMPLETE;
                controller.session.status = UploadStatus::Succeeded;
                controller.session.result = Some(result.clone());
                controller.publish();
                info!(
                    job_id = %result.job_id,
                    processing_time_seconds = result.processing_time_seconds,
                    "upload succeeded"
                );
                if !config.completion_grace.is_zero() {
                    tokio::time::sleep(config.completion_grace).await;
                }
                Ok(result)
            }
            Err(err) => {
                let message = err.user_message();
                error!(file = file.name(), error = %message, "upload failed");
                controller.session.status = UploadStatus::Failed;
                controller.session.error_message = Some(message);
                controller.publish();
                Err(UploadError::Api(err))
            }
        }
    }

    pub fn reset(&mut self) {
        debug!(from = ?self.session.status, "resetting upload session");
        self.session = UploadSession::default();
        self.publish();
    }

    fn advance_progress(&mut self, next: u8) {
        if next > self.session.progress_percent {
            self.session.progress_percent = next;
            self.publish();
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.session.clone());
    }
}

/// Settles a session whose `begin_upload` future was dropped before the response.
struct InFlight<'a> {
    controller: &'a mut UploadController,
    settled: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.settled || self.controller.session.status != UploadStatus::Uploading {
            return;
        }
        warn!(
            progress = self.controller.session.progress_percent,
            "upload abandoned before the service responded"
        );
        self.controller.session.status = UploadStatus::Failed;
        self.controller.session.error_message = Some(INTERRUPTED_MESSAGE.to_string());
        self.controller.publish();
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
