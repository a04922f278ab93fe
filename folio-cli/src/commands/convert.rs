//! Convert command implementation

use anyhow::{Context, Result};
use folio_core::{ConvertRequest, JobRunner, MetadataOverrides};
use std::path::PathBuf;
use uuid::Uuid;

pub struct ConvertOpts {
    pub title: Option<String>,
    pub author: Option<String>,
    pub series: Option<String>,
    pub description: Option<String>,
    pub cover: Option<String>,
    pub book_id: Option<Uuid>,
}

/// Convert a plain-text manuscript into a library EPUB
pub async fn convert(library: &str, input: &str, template: &str, opts: ConvertOpts) -> Result<()> {
    let runner = JobRunner::open(library)
        .await
        .with_context(|| format!("Failed to open library at {library}"))?;

    let job_id = runner
        .submit_convert(ConvertRequest {
            source: PathBuf::from(input),
            template_id: template.to_string(),
            overrides: MetadataOverrides {
                title: opts.title,
                author: opts.author,
                series: opts.series,
                description: opts.description,
            },
            cover: opts.cover.map(PathBuf::from),
            book_id: opts.book_id,
        })
        .await
        .context("Failed to submit conversion")?;

    let job = super::watch_job(&runner, job_id).await?;
    let book_id = job.book_id.context("job finished without a book id")?;
    let book = runner
        .book(book_id)
        .await
        .context("converted book missing from the library")?;

    tracing::info!(%job_id, %book_id, "conversion finished");
    println!("Converted '{}' -> {}", book.title, book.path.display());
    println!("Book id: {book_id}");

    Ok(())
}
