use super::*;
use crate::{
    error::{ApiClientError, NO_RESPONSE_MESSAGE},
    progress::{ProgressSender, TransferProgress},
    validator::{RejectionReason, ValidationError},
};
use async_trait::async_trait;
use bytes::Bytes;
use shared::{
    domain::JobId,
    protocol::{Acknowledgement, StatsRecord},
};
use std::{
    collections::VecDeque,
    sync::atomic::{AtomicUsize, Ordering},
};
use tokio::{sync::Mutex, task::JoinHandle};

enum Scripted {
    Succeed {
        result: SegmentationResult,
        progress: Vec<(u64, u64)>,
        delay: Duration,
    },
    Fail {
        error: ApiClientError,
        delay: Duration,
    },
    Hang,
}

struct ScriptedApi {
    calls: AtomicUsize,
    script: Mutex<VecDeque<Scripted>>,
}

impl ScriptedApi {
    fn new(script: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            script: Mutex::new(script.into()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SegmentationApi for ScriptedApi {
    async fn upload_image(
        &self,
        _file: &CandidateFile,
        progress: ProgressSender,
    ) -> Result<SegmentationResult, ApiClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().await.pop_front();
        match next {
            Some(Scripted::Succeed {
                result,
                progress: events,
                delay,
            }) => {
                for (sent, total) in events {
                    let _ = progress.send(TransferProgress { sent, total });
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
                tokio::time::sleep(delay).await;
                Ok(result)
            }
            Some(Scripted::Fail { error, delay }) => {
                tokio::time::sleep(delay).await;
                Err(error)
            }
            Some(Scripted::Hang) | None => std::future::pending().await,
        }
    }

    async fn get_result(&self, _job_id: &JobId) -> Result<SegmentationResult, ApiClientError> {
        Err(ApiClientError::NoResponse)
    }

    async fn get_stats(&self) -> Result<StatsRecord, ApiClientError> {
        Err(ApiClientError::NoResponse)
    }

    async fn cancel_job(&self, _job_id: &JobId) -> Result<Acknowledgement, ApiClientError> {
        Err(ApiClientError::NoResponse)
    }

    async fn fetch_artifact(&self, _relative_url: &str) -> Result<Bytes, ApiClientError> {
        Err(ApiClientError::NoResponse)
    }

    fn artifact_url(&self, relative_url: &str) -> String {
        relative_url.to_string()
    }
}

fn sample_result() -> SegmentationResult {
    SegmentationResult {
        job_id: JobId::from("j1"),
        original_filename: "a.png".into(),
        segmented_image_url: "/files/a_seg.png".into(),
        processing_time_seconds: 2.5,
    }
}

fn png() -> CandidateFile {
    CandidateFile::from_bytes("a.png", Bytes::from_static(b"not really a png"))
}

fn fast_config() -> ControllerConfig {
    ControllerConfig {
        heartbeat_interval: Duration::from_millis(5),
        completion_grace: Duration::ZERO,
        ..ControllerConfig::default()
    }
}

fn controller_with(api: Arc<ScriptedApi>) -> UploadController {
    UploadController::new(api, fast_config())
}

fn succeed_after(delay: Duration) -> Scripted {
    Scripted::Succeed {
        result: sample_result(),
        progress: Vec::new(),
        delay,
    }
}

/// Records every snapshot the observer gets to see until a terminal status.
fn collect_samples(
    mut rx: watch::Receiver<UploadSession>,
) -> JoinHandle<Vec<(UploadStatus, u8)>> {
    tokio::spawn(async move {
        let mut seen = Vec::new();
        loop {
            let snapshot = rx.borrow_and_update().clone();
            seen.push((snapshot.status(), snapshot.progress_percent()));
            if snapshot.status().is_terminal() || rx.changed().await.is_err() {
                break;
            }
        }
        seen
    })
}

#[tokio::test]
async fn accepted_file_reaches_selected() {
    let mut controller = controller_with(ScriptedApi::new(Vec::new()));
    controller.select_file(png()).expect("select");

    let session = controller.session();
    assert_eq!(session.status(), UploadStatus::Selected);
    assert_eq!(session.file().map(CandidateFile::name), Some("a.png"));
    assert_eq!(session.error_message(), None);
}

#[tokio::test]
async fn rejected_file_clears_prior_selection_and_surfaces_detail() {
    let mut controller = controller_with(ScriptedApi::new(Vec::new()));
    controller.select_file(png()).expect("select");

    let err = controller
        .select_file(CandidateFile::from_bytes("notes.txt", vec![1u8]))
        .expect_err("must reject");
    let validation = match err {
        UploadError::Validation(validation) => validation,
        other => panic!("expected validation error, got {other:?}"),
    };
    assert_eq!(validation.reason, RejectionReason::UnsupportedType);

    let session = controller.session();
    assert_eq!(session.status(), UploadStatus::Idle);
    assert!(session.file().is_none());
    assert_eq!(session.error_message(), Some(validation.detail.as_str()));
}

#[tokio::test]
async fn oversize_file_never_reaches_selected() {
    let api = ScriptedApi::new(Vec::new());
    let mut controller = UploadController::new(
        api.clone(),
        ControllerConfig {
            max_file_size: 4,
            ..fast_config()
        },
    );

    let err = controller
        .select_file(CandidateFile::from_bytes("big.png", vec![0u8; 5]))
        .expect_err("must reject");
    assert!(matches!(
        err,
        UploadError::Validation(ValidationError {
            reason: RejectionReason::OversizeFile,
            ..
        })
    ));
    assert_eq!(controller.session().status(), UploadStatus::Idle);
    assert_eq!(
        controller.begin_upload().await.expect_err("no file"),
        UploadError::NoFileSelected
    );
    assert_eq!(api.calls(), 0);
}

#[tokio::test]
async fn begin_upload_without_file_reports_no_file_selected() {
    let api = ScriptedApi::new(Vec::new());
    let mut controller = controller_with(api.clone());

    let err = controller.begin_upload().await.expect_err("must fail");
    assert_eq!(err, UploadError::NoFileSelected);
    assert_eq!(controller.session().status(), UploadStatus::Idle);
    assert_eq!(
        controller.session().error_message(),
        Some("Please select a file first.")
    );
    assert_eq!(api.calls(), 0);
}

#[tokio::test]
async fn successful_upload_exposes_result_at_full_progress() {
    let api = ScriptedApi::new(vec![succeed_after(Duration::from_millis(5))]);
    let mut controller = controller_with(api.clone());
    controller.select_file(png()).expect("select");

    let result = controller.begin_upload().await.expect("upload");

    assert_eq!(result, sample_result());
    let session = controller.session();
    assert_eq!(session.status(), UploadStatus::Succeeded);
    assert_eq!(session.progress_percent(), 100);
    assert_eq!(session.result(), Some(&sample_result()));
    assert_eq!(session.error_message(), None);
    assert!(session.file().is_some());
    assert_eq!(api.calls(), 1);
}

#[tokio::test]
async fn success_stays_visible_for_the_grace_interval() {
    let api = ScriptedApi::new(vec![succeed_after(Duration::ZERO)]);
    let mut controller = UploadController::new(
        api,
        ControllerConfig {
            completion_grace: Duration::from_millis(80),
            ..fast_config()
        },
    );
    controller.select_file(png()).expect("select");
    let mut rx = controller.subscribe();

    let started = Instant::now();
    controller.begin_upload().await.expect("upload");

    assert!(started.elapsed() >= Duration::from_millis(80));
    let snapshot = rx.borrow_and_update().clone();
    assert_eq!(snapshot.status(), UploadStatus::Succeeded);
    assert_eq!(snapshot.progress_percent(), 100);
}

#[tokio::test]
async fn server_detail_becomes_error_message_and_file_is_kept() {
    let api = ScriptedApi::new(vec![
        Scripted::Fail {
            error: ApiClientError::server(Some(400), "unsupported image"),
            delay: Duration::from_millis(5),
        },
        succeed_after(Duration::ZERO),
    ]);
    let mut controller = controller_with(api.clone());
    controller.select_file(png()).expect("select");

    let err = controller.begin_upload().await.expect_err("must fail");
    assert!(matches!(err, UploadError::Api(ApiClientError::Server { .. })));

    let session = controller.session();
    assert_eq!(session.status(), UploadStatus::Failed);
    assert_eq!(session.error_message(), Some("unsupported image"));
    assert_eq!(session.file().map(CandidateFile::name), Some("a.png"));
    assert!(session.progress_percent() < 100);

    controller.begin_upload().await.expect("retry kept file");
    assert_eq!(controller.session().status(), UploadStatus::Succeeded);
    assert_eq!(api.calls(), 2);
}

#[tokio::test]
async fn missing_response_fails_with_no_response_message() {
    let api = ScriptedApi::new(vec![Scripted::Fail {
        error: ApiClientError::NoResponse,
        delay: Duration::from_millis(5),
    }]);
    let mut controller = controller_with(api);
    controller.select_file(png()).expect("select");

    controller.begin_upload().await.expect_err("must fail");

    let session = controller.session();
    assert_eq!(session.status(), UploadStatus::Failed);
    assert_eq!(session.error_message(), Some(NO_RESPONSE_MESSAGE));
    assert!(NO_RESPONSE_MESSAGE.contains("No response from server"));
}

#[tokio::test]
async fn abandoned_upload_settles_as_failed_and_keeps_file() {
    let api = ScriptedApi::new(vec![Scripted::Hang, succeed_after(Duration::ZERO)]);
    let mut controller = controller_with(api.clone());
    controller.select_file(png()).expect("select");
    let mut rx = controller.subscribe();

    let abandoned =
        tokio::time::timeout(Duration::from_millis(30), controller.begin_upload()).await;
    assert!(abandoned.is_err(), "hanging upload must not resolve");

    let session = controller.session();
    assert_eq!(session.status(), UploadStatus::Failed);
    assert_eq!(session.error_message(), Some(INTERRUPTED_MESSAGE));
    assert_eq!(session.file().map(CandidateFile::name), Some("a.png"));
    assert!(session.progress_percent() < 100);
    assert_eq!(rx.borrow_and_update().status(), UploadStatus::Failed);

    controller.begin_upload().await.expect("retry kept file");
    assert_eq!(controller.session().status(), UploadStatus::Succeeded);
    assert_eq!(api.calls(), 2);
}

#[tokio::test]
async fn reselecting_after_abandoned_upload_is_allowed() {
    let api = ScriptedApi::new(vec![Scripted::Hang]);
    let mut controller = controller_with(api.clone());
    controller.select_file(png()).expect("select");

    let _ = tokio::time::timeout(Duration::from_millis(20), controller.begin_upload()).await;

    controller
        .select_file(CandidateFile::from_bytes("b.tif", vec![1u8, 2, 3]))
        .expect("select after abandon");
    let session = controller.session();
    assert_eq!(session.status(), UploadStatus::Selected);
    assert!(session.error_message().is_none());
    assert_eq!(api.calls(), 1);
}

#[tokio::test]
async fn begin_upload_after_success_requires_new_selection() {
    let api = ScriptedApi::new(vec![succeed_after(Duration::ZERO)]);
    let mut controller = controller_with(api.clone());
    controller.select_file(png()).expect("select");
    controller.begin_upload().await.expect("upload");
    let before = controller.session().clone();

    let err = controller.begin_upload().await.expect_err("must refuse");

    assert_eq!(err, UploadError::AlreadySucceeded);
    assert!(err.to_string().contains("Select a file"));
    assert_eq!(controller.session(), &before);
    assert_eq!(api.calls(), 1);
}

#[tokio::test]
async fn reset_from_any_terminal_status_clears_everything() {
    let api = ScriptedApi::new(vec![
        succeed_after(Duration::ZERO),
        Scripted::Fail {
            error: ApiClientError::request_setup("bad file"),
            delay: Duration::ZERO,
        },
    ]);
    let mut controller = controller_with(api);

    controller.select_file(png()).expect("select");
    controller.begin_upload().await.expect("upload");
    controller.reset();
    controller.reset();
    assert_eq!(controller.session(), &UploadSession::default());

    controller.select_file(png()).expect("select");
    controller.begin_upload().await.expect_err("fail");
    assert_eq!(controller.session().status(), UploadStatus::Failed);
    controller.reset();
    let session = controller.session();
    assert_eq!(session.status(), UploadStatus::Idle);
    assert_eq!(session.progress_percent(), 0);
    assert!(session.error_message().is_none());
    assert!(session.file().is_none());
    assert!(session.result().is_none());
}

#[tokio::test]
async fn new_selection_after_success_returns_to_selected() {
    let api = ScriptedApi::new(vec![succeed_after(Duration::ZERO)]);
    let mut controller = controller_with(api);
    controller.select_file(png()).expect("select");
    controller.begin_upload().await.expect("upload");

    controller
        .select_file(CandidateFile::from_bytes("b.tif", vec![1u8, 2, 3]))
        .expect("select again");
    let session = controller.session();
    assert_eq!(session.status(), UploadStatus::Selected);
    assert_eq!(session.progress_percent(), 0);
    assert!(session.result().is_none());
}

#[tokio::test]
async fn progress_is_monotonic_and_completes_only_on_success() {
    let api = ScriptedApi::new(vec![Scripted::Succeed {
        result: sample_result(),
        progress: vec![(10, 100), (35, 100), (60, 100), (100, 100)],
        delay: Duration::from_millis(40),
    }]);
    let mut controller = controller_with(api);
    controller.select_file(png()).expect("select");
    let samples = collect_samples(controller.subscribe());

    controller.begin_upload().await.expect("upload");
    let samples = samples.await.expect("collector");

    assert!(samples.len() >= 2, "samples: {samples:?}");
    assert!(
        samples.windows(2).all(|pair| pair[0].1 <= pair[1].1),
        "progress went backwards: {samples:?}"
    );
    for (status, percent) in &samples {
        if *status != UploadStatus::Succeeded {
            assert!(*percent < 100, "reached 100 before success: {samples:?}");
        }
    }
    assert_eq!(samples.last(), Some(&(UploadStatus::Succeeded, 100)));
}

#[tokio::test]
async fn heartbeat_moves_quiet_uploads_but_stops_at_ceiling() {
    let api = ScriptedApi::new(vec![succeed_after(Duration::from_millis(150))]);
    let mut controller = controller_with(api);
    controller.select_file(png()).expect("select");
    let samples = collect_samples(controller.subscribe());

    controller.begin_upload().await.expect("upload");
    let samples = samples.await.expect("collector");

    let peak_while_uploading = samples
        .iter()
        .filter(|(status, _)| *status == UploadStatus::Uploading)
        .map(|(_, percent)| *percent)
        .max()
        .unwrap_or_default();
    assert!(peak_while_uploading > 0, "heartbeat never advanced: {samples:?}");
    assert!(peak_while_uploading <= 90, "heartbeat passed ceiling: {samples:?}");
}

#[tokio::test]
async fn heartbeat_never_lowers_transport_progress() {
    let api = ScriptedApi::new(vec![Scripted::Succeed {
        result: sample_result(),
        progress: vec![(95, 100)],
        delay: Duration::from_millis(40),
    }]);
    let mut controller = controller_with(api);
    controller.select_file(png()).expect("select");
    let samples = collect_samples(controller.subscribe());

    controller.begin_upload().await.expect("upload");
    let samples = samples.await.expect("collector");

    let uploading: Vec<u8> = samples
        .iter()
        .filter(|(status, _)| *status == UploadStatus::Uploading)
        .map(|(_, percent)| *percent)
        .collect();
    let first_high = uploading
        .iter()
        .position(|p| *p >= 95)
        .unwrap_or_else(|| panic!("transport progress never observed: {samples:?}"));
    assert!(
        uploading[first_high..].iter().all(|p| *p == 95),
        "{uploading:?}"
    );
}

#[tokio::test]
async fn no_mutation_after_terminal_status() {
    let api = ScriptedApi::new(vec![Scripted::Fail {
        error: ApiClientError::NoResponse,
        delay: Duration::from_millis(20),
    }]);
    let mut controller = controller_with(api);
    controller.select_file(png()).expect("select");
    let mut rx = controller.subscribe();

    controller.begin_upload().await.expect_err("fail");
    let settled = rx.borrow_and_update().clone();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(!rx.has_changed().expect("sender alive"));
    assert_eq!(controller.session(), &settled);
    assert_eq!(settled.status(), UploadStatus::Failed);
}
