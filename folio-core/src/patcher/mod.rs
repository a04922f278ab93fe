//! Zip-level metadata patcher
//!
//! Edits the metadata of an existing EPUB without re-running conversion. Only
//! the package document (and, when a new cover is supplied, the cover member)
//! is rewritten; every other member is copied through at the raw zip level,
//! untouched and without recompression. Content, spine and navigation are
//! never altered.

use crate::assembler::sniff_cover;
use crate::error::PatchError;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::QName;
use quick_xml::{Reader, Writer};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Metadata fields to overwrite; `None` leaves the field untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetadataPatch {
    pub title: Option<String>,
    pub author: Option<String>,
    pub series: Option<String>,
    pub description: Option<String>,
}

impl MetadataPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.author.is_none()
            && self.series.is_none()
            && self.description.is_none()
    }
}

/// Metadata read back out of an EPUB's package document
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct EpubSummary {
    pub identifier: Option<String>,
    pub title: Option<String>,
    pub language: Option<String>,
    pub author: Option<String>,
    pub series: Option<String>,
    pub description: Option<String>,
    pub cover_href: Option<String>,
}

fn corrupt(e: impl std::fmt::Display) -> PatchError {
    PatchError::CorruptArchive(e.to_string())
}

fn malformed(e: impl std::fmt::Display) -> PatchError {
    PatchError::NotAnEpub(format!("malformed package document: {e}"))
}

/// Apply a metadata patch (and optionally a new cover) to EPUB bytes,
/// returning the patched archive.
///
/// An empty patch with no cover returns the input unchanged.
pub fn patch(
    epub: &[u8],
    fields: &MetadataPatch,
    cover: Option<&[u8]>,
) -> Result<Vec<u8>, PatchError> {
    if fields.is_empty() && cover.is_none() {
        return Ok(epub.to_vec());
    }

    let mut archive = ZipArchive::new(Cursor::new(epub)).map_err(corrupt)?;
    let opf_path = locate_opf(&mut archive)?;
    let opf_dir = parent_dir(&opf_path);
    let opf = read_member(&mut archive, &opf_path)?
        .ok_or_else(|| PatchError::NotAnEpub(format!("missing package document {opf_path}")))?;
    let opf_text = String::from_utf8(opf)
        .map_err(|_| PatchError::NotAnEpub("package document is not UTF-8".into()))?;
    let scan = scan_opf(&opf_text)?;

    let plan = cover_plan(cover, &scan)?;
    let new_opf = if fields.is_empty() && matches!(plan, CoverPlan::Keep | CoverPlan::ReplaceBytes(_))
    {
        None
    } else {
        Some(rewrite_opf(&opf_text, fields, &plan)?)
    };

    rebuild(&mut archive, &opf_path, &opf_dir, new_opf, &plan, cover)
}

/// Read metadata out of EPUB bytes without modifying anything
pub fn read_summary(epub: &[u8]) -> Result<EpubSummary, PatchError> {
    let mut archive = ZipArchive::new(Cursor::new(epub)).map_err(corrupt)?;
    let opf_path = locate_opf(&mut archive)?;
    let opf = read_member(&mut archive, &opf_path)?
        .ok_or_else(|| PatchError::NotAnEpub(format!("missing package document {opf_path}")))?;
    let opf_text = String::from_utf8(opf)
        .map_err(|_| PatchError::NotAnEpub("package document is not UTF-8".into()))?;
    let scan = scan_opf(&opf_text)?;

    Ok(EpubSummary {
        identifier: scan.identifier,
        title: scan.title,
        language: scan.language,
        author: scan.author,
        series: scan.series,
        description: scan.description,
        cover_href: scan.cover_item.map(|c| c.href),
    })
}

#[derive(Debug, Clone)]
struct CoverItem {
    id: String,
    href: String,
    media_type: String,
}

#[derive(Debug, Default)]
struct OpfScan {
    identifier: Option<String>,
    title: Option<String>,
    language: Option<String>,
    author: Option<String>,
    series: Option<String>,
    description: Option<String>,
    cover_item: Option<CoverItem>,
}

/// What the supplied cover (if any) means for the archive
#[derive(Debug, Clone)]
enum CoverPlan {
    /// No cover supplied
    Keep,
    /// Same format as the declared cover; only the member bytes change
    ReplaceBytes(String),
    /// Format changed; rewrite the manifest item and rename the member
    Retarget {
        item_id: String,
        old_href: String,
        new_href: String,
        media_type: &'static str,
    },
    /// No cover declared yet; add a manifest item and a new member
    Add {
        new_href: String,
        media_type: &'static str,
    },
}

fn cover_plan(cover: Option<&[u8]>, scan: &OpfScan) -> Result<CoverPlan, PatchError> {
    let Some(bytes) = cover else {
        return Ok(CoverPlan::Keep);
    };
    let (ext, media_type) = sniff_cover(bytes).map_err(|_| PatchError::UnsupportedCover)?;

    match &scan.cover_item {
        Some(item) if item.media_type == media_type => Ok(CoverPlan::ReplaceBytes(item.href.clone())),
        Some(item) => {
            let dir = parent_dir(&item.href);
            let new_href = if dir.is_empty() {
                format!("cover.{ext}")
            } else {
                format!("{dir}/cover.{ext}")
            };
            Ok(CoverPlan::Retarget {
                item_id: item.id.clone(),
                old_href: item.href.clone(),
                new_href,
                media_type,
            })
        }
        None => Ok(CoverPlan::Add {
            new_href: format!("Images/cover.{ext}"),
            media_type,
        }),
    }
}

/// Find the package document path via META-INF/container.xml
fn locate_opf<R: Read + std::io::Seek>(archive: &mut ZipArchive<R>) -> Result<String, PatchError> {
    let container = read_member(archive, "META-INF/container.xml")?
        .ok_or_else(|| PatchError::NotAnEpub("missing META-INF/container.xml".into()))?;
    let text = String::from_utf8(container)
        .map_err(|_| PatchError::NotAnEpub("container.xml is not UTF-8".into()))?;

    let mut reader = Reader::from_str(&text);
    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"rootfile" => {
                if let Some(attr) = e.try_get_attribute("full-path").map_err(malformed)? {
                    return Ok(attr.unescape_value().map_err(malformed)?.into_owned());
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Err(PatchError::NotAnEpub(
        "container.xml names no rootfile".into(),
    ))
}

fn read_member<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>, PatchError> {
    match archive.by_name(name) {
        Ok(mut entry) => {
            let mut out = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut out).map_err(corrupt)?;
            Ok(Some(out))
        }
        Err(zip::result::ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(corrupt(e)),
    }
}

fn attr_value(e: &BytesStart, name: &str) -> Result<Option<String>, PatchError> {
    Ok(e.try_get_attribute(name)
        .map_err(malformed)?
        .map(|a| a.unescape_value().map_err(malformed))
        .transpose()?
        .map(|v| v.into_owned()))
}

/// Read-only pass over the package document
fn scan_opf(opf: &str) -> Result<OpfScan, PatchError> {
    let mut reader = Reader::from_str(opf);
    let mut scan = OpfScan::default();
    let mut in_metadata = false;
    let mut cover_meta_id: Option<String> = None;
    let mut cover_by_properties: Option<CoverItem> = None;
    let mut items: Vec<CoverItem> = Vec::new();

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => {
                let local = e.local_name().as_ref().to_vec();
                match local.as_slice() {
                    b"metadata" => in_metadata = true,
                    b"identifier" | b"title" | b"language" | b"creator" | b"description"
                        if in_metadata =>
                    {
                        let name = e.name().as_ref().to_vec();
                        let text = reader
                            .read_text(QName(&name))
                            .map_err(malformed)?
                            .trim()
                            .to_string();
                        let slot = match local.as_slice() {
                            b"identifier" => &mut scan.identifier,
                            b"title" => &mut scan.title,
                            b"language" => &mut scan.language,
                            b"creator" => &mut scan.author,
                            _ => &mut scan.description,
                        };
                        if slot.is_none() {
                            *slot = Some(text);
                        }
                    }
                    b"meta" if in_metadata => {
                        let property = attr_value(&e, "property")?;
                        let name = e.name().as_ref().to_vec();
                        let text = reader
                            .read_text(QName(&name))
                            .map_err(malformed)?
                            .trim()
                            .to_string();
                        if property.as_deref() == Some("belongs-to-collection")
                            && scan.series.is_none()
                        {
                            scan.series = Some(text);
                        }
                    }
                    b"item" => collect_item(&e, &mut items, &mut cover_by_properties)?,
                    _ => {}
                }
            }
            Event::Empty(e) => match e.local_name().as_ref() {
                b"meta" if in_metadata => {
                    if attr_value(&e, "name")?.as_deref() == Some("cover") {
                        cover_meta_id = attr_value(&e, "content")?;
                    }
                }
                b"item" => collect_item(&e, &mut items, &mut cover_by_properties)?,
                _ => {}
            },
            Event::End(e) if e.local_name().as_ref() == b"metadata" => in_metadata = false,
            Event::Eof => break,
            _ => {}
        }
    }

    // An explicit cover-image property wins over the legacy meta pointer
    scan.cover_item = cover_by_properties.or_else(|| {
        cover_meta_id
            .as_deref()
            .and_then(|id| items.iter().find(|i| i.id == id))
            .cloned()
    });

    Ok(scan)
}

fn collect_item(
    e: &BytesStart,
    items: &mut Vec<CoverItem>,
    cover_by_properties: &mut Option<CoverItem>,
) -> Result<(), PatchError> {
    let id = attr_value(e, "id")?.unwrap_or_default();
    let href = attr_value(e, "href")?.unwrap_or_default();
    let media_type = attr_value(e, "media-type")?.unwrap_or_default();
    let properties = attr_value(e, "properties")?.unwrap_or_default();

    let item = CoverItem { id, href, media_type };
    if cover_by_properties.is_none()
        && properties.split_whitespace().any(|p| p == "cover-image")
    {
        *cover_by_properties = Some(item.clone());
    }
    items.push(item);
    Ok(())
}

/// Streaming rewrite of the package document.
///
/// The first occurrence of each patched field is replaced in place; fields
/// the document lacks are inserted before `</metadata>`. Everything else is
/// copied through event by event.
fn rewrite_opf(
    opf: &str,
    fields: &MetadataPatch,
    plan: &CoverPlan,
) -> Result<Vec<u8>, PatchError> {
    let mut reader = Reader::from_str(opf);
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    let mut in_metadata = false;
    let mut title_done = false;
    let mut author_done = false;
    let mut series_done = false;
    let mut description_done = false;

    loop {
        let event = reader.read_event().map_err(malformed)?;
        match event {
            Event::Start(ref e) => {
                let local = e.local_name().as_ref().to_vec();
                let replacement = if in_metadata {
                    match local.as_slice() {
                        b"title" if !title_done => {
                            title_done = true;
                            fields.title.as_deref()
                        }
                        b"creator" if !author_done => {
                            author_done = true;
                            fields.author.as_deref()
                        }
                        b"description" if !description_done => {
                            description_done = true;
                            fields.description.as_deref()
                        }
                        b"meta"
                            if !series_done
                                && attr_value(e, "property")?.as_deref()
                                    == Some("belongs-to-collection") =>
                        {
                            series_done = true;
                            fields.series.as_deref()
                        }
                        _ => None,
                    }
                } else {
                    None
                };

                if local.as_slice() == b"metadata" {
                    in_metadata = true;
                }

                match replacement {
                    Some(value) => {
                        let name = e.name().as_ref().to_vec();
                        writer.write_event(Event::Start(e.to_owned())).map_err(malformed)?;
                        writer
                            .write_event(Event::Text(BytesText::new(value)))
                            .map_err(malformed)?;
                        reader.read_to_end(QName(&name)).map_err(malformed)?;
                        writer
                            .write_event(Event::End(BytesEnd::new(
                                String::from_utf8_lossy(&name).into_owned(),
                            )))
                            .map_err(malformed)?;
                    }
                    None => {
                        if let Some(rewritten) = retarget_item(e, plan)? {
                            writer.write_event(Event::Start(rewritten)).map_err(malformed)?;
                        } else {
                            writer.write_event(event.clone()).map_err(malformed)?;
                        }
                    }
                }
            }
            Event::Empty(ref e) => {
                if let Some(rewritten) = retarget_item(e, plan)? {
                    writer.write_event(Event::Empty(rewritten)).map_err(malformed)?;
                } else {
                    writer.write_event(event.clone()).map_err(malformed)?;
                }
            }
            Event::End(ref e) => {
                let local = e.local_name().as_ref().to_vec();
                if local.as_slice() == b"metadata" {
                    in_metadata = false;
                    if !title_done {
                        write_simple(&mut writer, "dc:title", fields.title.as_deref())?;
                    }
                    if !author_done {
                        write_simple(&mut writer, "dc:creator", fields.author.as_deref())?;
                    }
                    if !description_done {
                        write_simple(&mut writer, "dc:description", fields.description.as_deref())?;
                    }
                    if !series_done {
                        if let Some(series) = fields.series.as_deref() {
                            let mut start = BytesStart::new("meta");
                            start.push_attribute(("property", "belongs-to-collection"));
                            writer.write_event(Event::Start(start)).map_err(malformed)?;
                            writer
                                .write_event(Event::Text(BytesText::new(series)))
                                .map_err(malformed)?;
                            writer
                                .write_event(Event::End(BytesEnd::new("meta")))
                                .map_err(malformed)?;
                        }
                    }
                } else if local.as_slice() == b"manifest" {
                    if let CoverPlan::Add {
                        new_href,
                        media_type,
                    } = plan
                    {
                        let mut item = BytesStart::new("item");
                        item.push_attribute(("id", "cover-image"));
                        item.push_attribute(("href", new_href.as_str()));
                        item.push_attribute(("media-type", *media_type));
                        item.push_attribute(("properties", "cover-image"));
                        writer.write_event(Event::Empty(item)).map_err(malformed)?;
                    }
                }
                writer.write_event(event.clone()).map_err(malformed)?;
            }
            Event::Eof => break,
            other => writer.write_event(other.clone()).map_err(malformed)?,
        }
    }

    Ok(writer.into_inner().into_inner())
}

/// When the cover format changed, rewrite the declared cover item's href and
/// media-type, keeping every other attribute
fn retarget_item(e: &BytesStart, plan: &CoverPlan) -> Result<Option<BytesStart<'static>>, PatchError> {
    let CoverPlan::Retarget {
        item_id,
        new_href,
        media_type,
        ..
    } = plan
    else {
        return Ok(None);
    };
    if e.local_name().as_ref() != b"item" || attr_value(e, "id")?.as_deref() != Some(item_id) {
        return Ok(None);
    }

    let mut rewritten = BytesStart::new("item");
    for attr in e.attributes() {
        let attr = attr.map_err(malformed)?;
        match attr.key.as_ref() {
            b"href" => rewritten.push_attribute(("href", new_href.as_str())),
            b"media-type" => rewritten.push_attribute(("media-type", *media_type)),
            key => {
                let key = String::from_utf8_lossy(key).into_owned();
                let value = attr.unescape_value().map_err(malformed)?.into_owned();
                rewritten.push_attribute((key.as_str(), value.as_str()));
            }
        }
    }
    Ok(Some(rewritten))
}

fn write_simple(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    tag: &str,
    value: Option<&str>,
) -> Result<(), PatchError> {
    let Some(value) = value else { return Ok(()) };
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .map_err(malformed)?;
    writer
        .write_event(Event::Text(BytesText::new(value)))
        .map_err(malformed)?;
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .map_err(malformed)?;
    Ok(())
}

/// Rebuild the archive: mimetype first, the package document (and cover)
/// replaced, everything else raw-copied
fn rebuild(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    opf_path: &str,
    opf_dir: &str,
    new_opf: Option<Vec<u8>>,
    plan: &CoverPlan,
    cover: Option<&[u8]>,
) -> Result<Vec<u8>, PatchError> {
    let zip_err = |e: zip::result::ZipError| PatchError::Archive(e.to_string());
    let io_err = |e: std::io::Error| PatchError::Archive(e.to_string());

    // Resolved zip paths of members this patch replaces or drops
    let (old_cover, new_cover) = match plan {
        CoverPlan::Keep => (None, None),
        CoverPlan::ReplaceBytes(href) => {
            let path = resolve_href(opf_dir, href);
            (Some(path.clone()), Some(path))
        }
        CoverPlan::Retarget {
            old_href, new_href, ..
        } => (
            Some(resolve_href(opf_dir, old_href)),
            Some(resolve_href(opf_dir, new_href)),
        ),
        CoverPlan::Add { new_href, .. } => (None, Some(resolve_href(opf_dir, new_href))),
    };

    let mut zw = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    let mimetype_index = (0..archive.len()).find(|&i| {
        archive
            .by_index_raw(i)
            .map(|f| f.name() == "mimetype")
            .unwrap_or(false)
    });
    if let Some(i) = mimetype_index {
        let entry = archive.by_index_raw(i).map_err(zip_err)?;
        zw.raw_copy_file(entry).map_err(zip_err)?;
    }

    for i in 0..archive.len() {
        if Some(i) == mimetype_index {
            continue;
        }
        let entry = archive.by_index_raw(i).map_err(zip_err)?;
        let name = entry.name().to_string();
        if name == opf_path && new_opf.is_some() {
            drop(entry);
            zw.start_file(name, options).map_err(zip_err)?;
            zw.write_all(new_opf.as_deref().unwrap_or_default()).map_err(io_err)?;
        } else if old_cover.as_deref() == Some(name.as_str()) {
            // Replaced (or renamed away) below
        } else {
            zw.raw_copy_file(entry).map_err(zip_err)?;
        }
    }

    if let (Some(path), Some(bytes)) = (new_cover, cover) {
        zw.start_file(path, options).map_err(zip_err)?;
        zw.write_all(bytes).map_err(io_err)?;
    }

    let cursor = zw.finish().map_err(zip_err)?;
    Ok(cursor.into_inner())
}

fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

/// Resolve an href relative to the package document's directory, collapsing
/// `.` and `..` components
fn resolve_href(opf_dir: &str, href: &str) -> String {
    let mut parts: Vec<&str> = if opf_dir.is_empty() {
        Vec::new()
    } else {
        opf_dir.split('/').collect()
    };
    for part in href.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    parts.join("/")
}
