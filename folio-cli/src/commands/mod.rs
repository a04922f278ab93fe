//! CLI command implementations

mod convert;
mod import;
mod info;
mod list;
mod patch;
mod preview;

pub use convert::{convert, ConvertOpts};
pub use import::import;
pub use info::info;
pub use list::list;
pub use patch::{patch, PatchOpts};
pub use preview::preview;

use anyhow::{bail, Result};
use folio_core::{Job, JobRunner, JobStage};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use uuid::Uuid;

/// Poll a submitted job with a spinner until it reaches a terminal stage
pub(crate) async fn watch_job(runner: &JobRunner, job_id: Uuid) -> Result<Job> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    loop {
        let Some(job) = runner.job(job_id).await else {
            pb.finish_and_clear();
            bail!("job {job_id} disappeared");
        };
        pb.set_message(format!("{} ({}%)", stage_label(job.stage), job.progress));
        if job.stage.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let job = runner.wait(job_id).await?;
    pb.finish_and_clear();

    match job.stage {
        JobStage::Succeeded => Ok(job),
        JobStage::Canceled => bail!("job {job_id} was canceled"),
        _ => {
            let detail = job
                .error
                .as_ref()
                .map(|e| e.detail.clone())
                .unwrap_or_else(|| "unknown error".into());
            bail!("job {job_id} failed: {detail}")
        }
    }
}

fn stage_label(stage: JobStage) -> &'static str {
    match stage {
        JobStage::Queued => "Queued",
        JobStage::Preprocessing => "Reading input",
        JobStage::Segmenting => "Segmenting",
        JobStage::Assembling => "Assembling EPUB",
        JobStage::PatchingMetadata => "Patching metadata",
        JobStage::Finalizing => "Finalizing",
        JobStage::Succeeded => "Done",
        JobStage::Failed => "Failed",
        JobStage::Canceled => "Canceled",
    }
}
