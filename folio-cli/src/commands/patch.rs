//! Patch command implementation

use anyhow::{Context, Result};
use folio_core::{JobRunner, MetadataPatch, PatchRequest};
use std::path::PathBuf;
use uuid::Uuid;

pub struct PatchOpts {
    pub title: Option<String>,
    pub author: Option<String>,
    pub series: Option<String>,
    pub description: Option<String>,
    pub cover: Option<String>,
}

/// Patch metadata of an existing library book
pub async fn patch(library: &str, book_id: Uuid, opts: PatchOpts) -> Result<()> {
    let runner = JobRunner::open(library)
        .await
        .with_context(|| format!("Failed to open library at {library}"))?;

    let job_id = runner
        .submit_patch(PatchRequest {
            book_id,
            fields: MetadataPatch {
                title: opts.title,
                author: opts.author,
                series: opts.series,
                description: opts.description,
            },
            cover: opts.cover.map(PathBuf::from),
        })
        .await
        .context("Failed to submit patch")?;

    super::watch_job(&runner, job_id).await?;
    let book = runner.book(book_id).await.context("book missing after patch")?;

    println!("Patched '{}' ({})", book.title, book.path.display());
    Ok(())
}
