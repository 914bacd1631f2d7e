use std::{io::Write, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shared::domain::JobId;
use tokio::{sync::watch, task::JoinHandle};
use tracing::info;
use tracing_subscriber::EnvFilter;
use upload_core::{
    load_settings, CandidateFile, ResultRenderer, SegmentationApi, SegmentationClient, Settings,
    UploadController, UploadSession, UploadStatus,
};

#[derive(Parser, Debug)]
#[command(about = "Submit a raster image to the segmentation service")]
struct Cli {
    /// Overrides the service base url, e.g. http://localhost:8000/api
    #[arg(long)]
    base_url: Option<String>,
    #[arg(long)]
    max_file_size: Option<u64>,
    #[arg(long)]
    timeout_secs: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate, upload and show the segmented result.
    Upload {
        path: PathBuf,
        /// Save the segmented image into this directory.
        #[arg(long)]
        download_dir: Option<PathBuf>,
    },
    Result {
        job_id: String,
    },
    Stats,
    Cancel {
        job_id: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings();
    if let Some(base_url) = cli.base_url {
        settings.api_base_url = base_url;
    }
    if let Some(max_file_size) = cli.max_file_size {
        settings.max_file_size = max_file_size;
    }
    if let Some(timeout_secs) = cli.timeout_secs {
        settings.request_timeout_secs = timeout_secs;
    }
    settings.validate()?;
    info!(
        base_url = %settings.api_base_url,
        max_file_size = settings.max_file_size,
        timeout_secs = settings.request_timeout_secs,
        "using segmentation service"
    );

    let api: Arc<dyn SegmentationApi> = Arc::new(
        SegmentationClient::from_settings(&settings).context("failed to build service client")?,
    );

    match cli.command {
        Command::Upload { path, download_dir } => {
            run_upload(api, &settings, path, download_dir).await?
        }
        Command::Result { job_id } => {
            let result = api.get_result(&JobId::from(job_id)).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Stats => {
            let stats = api.get_stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Cancel { job_id } => {
            let ack = api.cancel_job(&JobId::from(job_id)).await?;
            println!("{}", serde_json::to_string_pretty(&ack)?);
        }
    }

    Ok(())
}

async fn run_upload(
    api: Arc<dyn SegmentationApi>,
    settings: &Settings,
    path: PathBuf,
    download_dir: Option<PathBuf>,
) -> Result<()> {
    let mut controller = UploadController::new(Arc::clone(&api), settings.controller_config());
    let candidate = CandidateFile::from_path(&path)?;
    println!(
        "Selected file: {} ({:.2} MB)",
        candidate.name(),
        candidate.byte_size() as f64 / 1024.0 / 1024.0
    );
    controller.select_file(candidate)?;

    let printer = spawn_progress_printer(controller.subscribe());
    let outcome = controller.begin_upload().await;
    let _ = printer.await;
    let result = outcome?;
    controller.reset();

    let mut view = ResultRenderer::new(api, result);
    println!("{}", view.summary());
    println!("View full size: {}", view.view_url());

    if let Some(dir) = download_dir {
        let saved = view.download(&dir).await??;
        println!("Saved {}", saved.display());
    }
    Ok(())
}

fn spawn_progress_printer(mut rx: watch::Receiver<UploadSession>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_printed = None;
        loop {
            let (status, percent) = {
                let session = rx.borrow_and_update();
                (session.status(), session.progress_percent())
            };
            let visible = matches!(status, UploadStatus::Uploading | UploadStatus::Succeeded);
            if visible && last_printed != Some(percent) {
                eprint!("\r{percent:>3}% Uploaded");
                let _ = std::io::stderr().flush();
                last_printed = Some(percent);
            }
            if status.is_terminal() {
                if last_printed.is_some() {
                    eprintln!();
                }
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
}
