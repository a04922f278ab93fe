//! Import command implementation

use anyhow::{Context, Result};
use folio_core::{ImportRequest, JobRunner, MetadataOverrides};
use std::path::PathBuf;

/// Import an existing EPUB file into the library
pub async fn import(
    library: &str,
    input: &str,
    title: Option<String>,
    author: Option<String>,
) -> Result<()> {
    let runner = JobRunner::open(library)
        .await
        .with_context(|| format!("Failed to open library at {library}"))?;

    let job_id = runner
        .submit_import(ImportRequest {
            source: PathBuf::from(input),
            overrides: MetadataOverrides {
                title,
                author,
                ..Default::default()
            },
        })
        .await
        .context("Failed to submit import")?;

    let job = super::watch_job(&runner, job_id).await?;
    let book_id = job.book_id.context("job finished without a book id")?;
    let book = runner.book(book_id).await.context("imported book missing")?;

    println!("Imported '{}' -> {}", book.title, book.path.display());
    println!("Book id: {book_id}");
    Ok(())
}
