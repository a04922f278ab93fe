//! List command implementation

use anyhow::{bail, Context, Result};
use folio_core::{BookFilter, BookSort, BookStatus, JobRunner};

/// List library books, optionally filtered by status
pub async fn list(library: &str, status: Option<&str>, sort: &str, json: bool) -> Result<()> {
    let status = match status {
        None => None,
        Some("pending") => Some(BookStatus::Pending),
        Some("synced") => Some(BookStatus::Synced),
        Some("error") => Some(BookStatus::Error),
        Some(other) => bail!("unknown status '{other}' (expected pending, synced or error)"),
    };
    let sort = match sort {
        "title" => BookSort::Title,
        "updated" => BookSort::UpdatedAt,
        other => bail!("unknown sort order '{other}' (expected title or updated)"),
    };

    let runner = JobRunner::open(library)
        .await
        .with_context(|| format!("Failed to open library at {library}"))?;
    let books = runner.books(&BookFilter { status, author: None }, sort).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&books)?);
        return Ok(());
    }

    if books.is_empty() {
        println!("No books in the library");
        return Ok(());
    }
    for book in books {
        let status = match book.status {
            BookStatus::Pending => "pending",
            BookStatus::Synced => "synced",
            BookStatus::Error => "error",
        };
        let author = book.author.as_deref().unwrap_or("-");
        println!("{}  {:<8}  {}  ({author})", book.id, status, book.title);
    }

    Ok(())
}
