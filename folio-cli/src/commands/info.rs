//! Info command implementation

use anyhow::{Context, Result};
use folio_core::patcher;
use std::fs;

/// Display metadata of an EPUB file
pub fn info(input: &str, json: bool) -> Result<()> {
    let bytes = fs::read(input).with_context(|| format!("Failed to open input file: {input}"))?;
    let summary = patcher::read_summary(&bytes)
        .with_context(|| format!("Failed to read metadata from {input}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        if let Some(title) = &summary.title {
            println!("Title:       {title}");
        }
        if let Some(author) = &summary.author {
            println!("Author:      {author}");
        }
        if let Some(series) = &summary.series {
            println!("Series:      {series}");
        }
        if let Some(language) = &summary.language {
            println!("Language:    {language}");
        }
        if let Some(description) = &summary.description {
            println!("Description: {description}");
        }
        if let Some(identifier) = &summary.identifier {
            println!("Identifier:  {identifier}");
        }
        if let Some(cover) = &summary.cover_href {
            println!("Cover:       {cover}");
        }
    }

    Ok(())
}
