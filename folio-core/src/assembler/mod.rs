//! Deterministic EPUB assembler
//!
//! Maps a TOC tree plus metadata to a complete EPUB 3 archive held in memory.
//! All inputs that could vary between runs (identifier, modification time)
//! are supplied by the caller, so identical inputs produce byte-identical
//! archives.

use crate::error::AssemblyError;
use crate::types::TocNode;
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::io::{Cursor, Write};
use uuid::Uuid;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Metadata baked into the package document
#[derive(Debug, Clone, PartialEq)]
pub struct EpubMetadata {
    pub identifier: Uuid,
    pub title: String,
    pub language: String,
    pub author: Option<String>,
    pub series: Option<String>,
    pub description: Option<String>,
}

impl EpubMetadata {
    pub fn new(identifier: Uuid, title: impl Into<String>) -> Self {
        Self {
            identifier,
            title: title.into(),
            language: "zh".into(),
            author: None,
            series: None,
            description: None,
        }
    }
}

/// One spine section derived from the TOC tree
struct Section {
    id: String,
    href: String,
    title: String,
    body: String,
    depth: usize,
    /// Number of direct child sections, used to rebuild nav nesting
    child_count: usize,
}

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="EPUB/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

const STYLESHEET: &str = "\
html, body { margin: 0; padding: 0 0.8em; line-height: 1.6; }
h1, h2, h3 { text-align: center; font-weight: bold; }
p { text-indent: 2em; margin: 0.4em 0; }
";

/// Assemble a complete EPUB archive from a segmented TOC tree.
///
/// `modified` stamps both the package document and every zip member, keeping
/// the archive reproducible.
pub fn assemble(
    toc: &TocNode,
    meta: &EpubMetadata,
    cover: Option<&[u8]>,
    modified: DateTime<Utc>,
) -> Result<Vec<u8>, AssemblyError> {
    if toc.children.is_empty() && !toc.has_content() {
        return Err(AssemblyError::EmptyToc);
    }

    let cover_image = cover.map(sniff_cover).transpose()?;
    let sections = collect_sections(toc, meta);

    let zip_time = zip_timestamp(modified);
    let stored = FileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(zip_time);
    let deflated = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip_time);

    let mut zw = ZipWriter::new(Cursor::new(Vec::new()));
    let archive = |e: zip::result::ZipError| AssemblyError::Archive(e.to_string());
    let io = |e: std::io::Error| AssemblyError::Archive(e.to_string());

    // The mimetype member must come first and be stored uncompressed
    zw.start_file("mimetype", stored).map_err(archive)?;
    zw.write_all(b"application/epub+zip").map_err(io)?;

    zw.start_file("META-INF/container.xml", deflated).map_err(archive)?;
    zw.write_all(CONTAINER_XML.as_bytes()).map_err(io)?;

    zw.start_file("EPUB/content.opf", deflated).map_err(archive)?;
    zw.write_all(render_opf(meta, &sections, cover_image, modified).as_bytes())
        .map_err(io)?;

    zw.start_file("EPUB/nav.xhtml", deflated).map_err(archive)?;
    zw.write_all(render_nav(meta, &sections).as_bytes()).map_err(io)?;

    zw.start_file("EPUB/toc.ncx", deflated).map_err(archive)?;
    zw.write_all(render_ncx(meta, &sections).as_bytes()).map_err(io)?;

    zw.start_file("EPUB/Styles/style.css", deflated).map_err(archive)?;
    zw.write_all(STYLESHEET.as_bytes()).map_err(io)?;

    for section in &sections {
        zw.start_file(format!("EPUB/{}", section.href), deflated)
            .map_err(archive)?;
        zw.write_all(render_section(section).as_bytes()).map_err(io)?;
    }

    if let (Some((ext, _)), Some(bytes)) = (cover_image, cover) {
        zw.start_file(format!("EPUB/Images/cover.{ext}"), deflated)
            .map_err(archive)?;
        zw.write_all(bytes).map_err(io)?;
    }

    let cursor = zw.finish().map_err(archive)?;
    Ok(cursor.into_inner())
}

/// Identify the cover format by magic bytes
pub(crate) fn sniff_cover(bytes: &[u8]) -> Result<(&'static str, &'static str), AssemblyError> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Ok(("jpg", "image/jpeg"))
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        Ok(("png", "image/png"))
    } else if bytes.starts_with(b"GIF8") {
        Ok(("gif", "image/gif"))
    } else if bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(b"WEBP") {
        Ok(("webp", "image/webp"))
    } else {
        Err(AssemblyError::UnsupportedCover)
    }
}

/// Flatten the tree into spine order. Front matter on the root becomes the
/// first section, titled after the book. Group-only nodes still get a
/// (minimal) document so every nav entry has a target.
fn collect_sections(toc: &TocNode, meta: &EpubMetadata) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut counter = 0usize;

    let mut next = |title: &str, body: String, depth: usize, child_count: usize| {
        counter += 1;
        Section {
            id: format!("sec{counter:04}"),
            href: format!("Text/section_{counter:04}.xhtml"),
            title: title.to_string(),
            body,
            depth,
            child_count,
        }
    };

    if toc.has_content() {
        sections.push(next(&meta.title, paragraphs(&toc.content), 1, 0));
    }

    fn walk(
        node: &TocNode,
        depth: usize,
        sections: &mut Vec<Section>,
        next: &mut dyn FnMut(&str, String, usize, usize) -> Section,
    ) {
        for child in &node.children {
            let body = paragraphs(&child.content);
            sections.push(next(&child.title, body, depth, child.children.len()));
            walk(child, depth + 1, sections, next);
        }
    }
    walk(toc, 1, &mut sections, &mut next);

    sections
}

fn paragraphs(lines: &[String]) -> String {
    lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| format!("    <p>{}</p>\n", escape_html(l.trim())))
        .collect()
}

fn render_section(section: &Section) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
  <head>
    <title>{title}</title>
    <link rel="stylesheet" type="text/css" href="../Styles/style.css"/>
  </head>
  <body>
    <h2>{title}</h2>
{body}  </body>
</html>
"#,
        title = escape_html(&section.title),
        body = section.body,
    )
}

fn render_opf(
    meta: &EpubMetadata,
    sections: &[Section],
    cover: Option<(&'static str, &'static str)>,
    modified: DateTime<Utc>,
) -> String {
    let mut metadata = String::new();
    metadata.push_str(&format!(
        "    <dc:identifier id=\"book-id\">urn:uuid:{}</dc:identifier>\n",
        meta.identifier
    ));
    metadata.push_str(&format!(
        "    <dc:title>{}</dc:title>\n",
        escape_html(&meta.title)
    ));
    metadata.push_str(&format!(
        "    <dc:language>{}</dc:language>\n",
        escape_html(&meta.language)
    ));
    if let Some(author) = &meta.author {
        metadata.push_str(&format!(
            "    <dc:creator>{}</dc:creator>\n",
            escape_html(author)
        ));
    }
    if let Some(description) = &meta.description {
        metadata.push_str(&format!(
            "    <dc:description>{}</dc:description>\n",
            escape_html(description)
        ));
    }
    if let Some(series) = &meta.series {
        metadata.push_str(&format!(
            "    <meta property=\"belongs-to-collection\">{}</meta>\n",
            escape_html(series)
        ));
    }
    metadata.push_str(&format!(
        "    <meta property=\"dcterms:modified\">{}</meta>\n",
        modified.format("%Y-%m-%dT%H:%M:%SZ")
    ));
    if cover.is_some() {
        metadata.push_str("    <meta name=\"cover\" content=\"cover-image\"/>\n");
    }

    let mut manifest = String::new();
    manifest.push_str(
        "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\"/>\n",
    );
    manifest.push_str(
        "    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>\n",
    );
    manifest.push_str("    <item id=\"css\" href=\"Styles/style.css\" media-type=\"text/css\"/>\n");
    if let Some((ext, media_type)) = cover {
        manifest.push_str(&format!(
            "    <item id=\"cover-image\" href=\"Images/cover.{ext}\" media-type=\"{media_type}\" properties=\"cover-image\"/>\n",
        ));
    }
    for section in sections {
        manifest.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"application/xhtml+xml\"/>\n",
            section.id, section.href
        ));
    }

    let spine: String = sections
        .iter()
        .map(|s| format!("    <itemref idref=\"{}\"/>\n", s.id))
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" xmlns:dc="http://purl.org/dc/elements/1.1/" version="3.0" unique-identifier="book-id">
  <metadata>
{metadata}  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine toc="ncx">
{spine}  </spine>
</package>
"#
    )
}

fn render_nav(meta: &EpubMetadata, sections: &[Section]) -> String {
    let mut items = String::new();
    render_nav_level(sections, &mut 0, &mut items, 3);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
  <head>
    <title>{title}</title>
  </head>
  <body>
    <nav epub:type="toc">
      <ol>
{items}      </ol>
    </nav>
  </body>
</html>
"#,
        title = escape_html(&meta.title),
        items = items,
    )
}

/// Emit `<li>` entries for consecutive sections, recursing into each
/// section's children as a nested `<ol>`
fn render_nav_level(sections: &[Section], pos: &mut usize, out: &mut String, indent: usize) {
    let pad = "  ".repeat(indent);
    while *pos < sections.len() {
        let section = &sections[*pos];
        *pos += 1;
        out.push_str(&format!(
            "{pad}<li><a href=\"{}\">{}</a>",
            section.href,
            escape_html(&section.title)
        ));
        if section.child_count > 0 {
            out.push_str(&format!("\n{pad}  <ol>\n"));
            for _ in 0..section.child_count {
                render_nav_level(sections, pos, out, indent + 2);
            }
            out.push_str(&format!("{pad}  </ol>\n{pad}</li>\n"));
        } else {
            out.push_str("</li>\n");
        }
        // Only the caller iterates siblings; one entry per invocation when
        // called from a parent
        if indent > 3 {
            break;
        }
    }
}

fn render_ncx(meta: &EpubMetadata, sections: &[Section]) -> String {
    let mut points = String::new();
    let mut open_depth = 0usize;
    for (order, section) in sections.iter().enumerate() {
        while open_depth >= section.depth {
            points.push_str(&format!("{}</navPoint>\n", "  ".repeat(open_depth + 1)));
            open_depth -= 1;
        }
        let pad = "  ".repeat(section.depth + 1);
        points.push_str(&format!(
            "{pad}<navPoint id=\"nav-{id}\" playOrder=\"{order}\">\n{pad}  <navLabel><text>{title}</text></navLabel>\n{pad}  <content src=\"{href}\"/>\n",
            id = section.id,
            order = order + 1,
            title = escape_html(&section.title),
            href = section.href,
        ));
        open_depth = section.depth;
    }
    while open_depth >= 1 {
        points.push_str(&format!("{}</navPoint>\n", "  ".repeat(open_depth + 1)));
        open_depth -= 1;
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="urn:uuid:{identifier}"/>
    <meta name="dtb:depth" content="{depth}"/>
  </head>
  <docTitle><text>{title}</text></docTitle>
  <navMap>
{points}  </navMap>
</ncx>
"#,
        identifier = meta.identifier,
        depth = sections.iter().map(|s| s.depth).max().unwrap_or(1),
        title = escape_html(&meta.title),
        points = points,
    )
}

fn zip_timestamp(modified: DateTime<Utc>) -> zip::DateTime {
    // Zip timestamps only cover 1980..=2107
    let year = modified.year().clamp(1980, 2107) as u16;
    zip::DateTime::from_date_and_time(
        year,
        modified.month() as u8,
        modified.day() as u8,
        modified.hour() as u8,
        modified.minute() as u8,
        modified.second() as u8,
    )
    .unwrap_or_default()
}

pub(crate) fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
