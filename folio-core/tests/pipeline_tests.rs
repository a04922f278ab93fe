//! End-to-end pipeline tests: manuscript bytes in, patched EPUB out

use chrono::TimeZone;
use folio_core::{
    assembler, patcher, templates, ConvertRequest, EpubMetadata, JobRunner, JobStage,
    MetadataOverrides, MetadataPatch, Segmenter, TocNode,
};
use std::io::{Cursor, Read};
use uuid::Uuid;

const MANUSCRIPT: &str = "\
我的小说
第一卷 风起
卷首语在此。
第一章 少年
他推开门。
PS:求收藏
第二章 出山
山路很长。
第二卷 云涌
第三章 入城
城门将闭。
";

fn segment(input: &str) -> folio_core::Segmentation {
    let rules = templates::default_template().compile().unwrap();
    Segmenter::new().segment(input.as_bytes(), &rules).unwrap()
}

fn zip_member(bytes: &[u8], name: &str) -> String {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    let mut out = String::new();
    archive
        .by_name(name)
        .unwrap()
        .read_to_string(&mut out)
        .unwrap();
    out
}

#[test]
fn segmentation_builds_the_expected_hierarchy() {
    let seg = segment(MANUSCRIPT);

    assert_eq!(seg.root.content, vec!["我的小说"]);
    assert_eq!(seg.derived_title.as_deref(), Some("我的小说"));

    let volumes: Vec<_> = seg.root.children.iter().map(|v| v.title.as_str()).collect();
    assert_eq!(volumes, vec!["第一卷 风起", "第二卷 云涌"]);

    let first = &seg.root.children[0];
    assert_eq!(first.content, vec!["卷首语在此。"]);
    let chapters: Vec<_> = first.children.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(chapters, vec!["第一章 少年", "第二章 出山"]);

    assert_eq!(seg.skipped.len(), 1);
    assert_eq!(seg.skipped[0].raw_text, "PS:求收藏");
}

#[test]
fn every_node_range_is_contained_in_its_parent() {
    let seg = segment(MANUSCRIPT);

    fn check(node: &TocNode) {
        let (start, end) = node.source_line_range;
        assert!(start <= end, "{:?} has an inverted range", node.title);
        for child in &node.children {
            let (cs, ce) = child.source_line_range;
            assert!(start <= cs && ce <= end, "{:?} escapes {:?}", child.title, node.title);
            check(child);
        }
    }
    check(&seg.root);
}

#[test]
fn convert_then_patch_round_trips_through_the_package_document() {
    let seg = segment(MANUSCRIPT);
    let mut meta = EpubMetadata::new(Uuid::new_v4(), "我的小说");
    meta.author = Some("无名氏".into());
    let modified = chrono::Utc.with_ymd_and_hms(2024, 3, 3, 3, 3, 3).unwrap();
    let epub = assembler::assemble(&seg.root, &meta, None, modified).unwrap();

    let fields = MetadataPatch {
        title: Some("改版".into()),
        series: Some("三部曲".into()),
        ..Default::default()
    };
    let patched = patcher::patch(&epub, &fields, None).unwrap();

    let summary = patcher::read_summary(&patched).unwrap();
    assert_eq!(summary.title.as_deref(), Some("改版"));
    assert_eq!(summary.series.as_deref(), Some("三部曲"));
    assert_eq!(summary.author.as_deref(), Some("无名氏"));

    // Spine and content untouched by the patch
    for name in [
        "EPUB/nav.xhtml",
        "EPUB/toc.ncx",
        "EPUB/Text/section_0001.xhtml",
        "EPUB/Text/section_0005.xhtml",
    ] {
        assert_eq!(zip_member(&epub, name), zip_member(&patched, name), "{name} changed");
    }
}

#[test]
fn assembly_is_deterministic_across_runs() {
    let modified = chrono::Utc.with_ymd_and_hms(2024, 3, 3, 0, 0, 0).unwrap();
    let id = Uuid::parse_str("00000000-0000-4000-8000-000000000042").unwrap();

    let build = || {
        let seg = segment(MANUSCRIPT);
        let meta = EpubMetadata::new(id, "我的小说");
        assembler::assemble(&seg.root, &meta, None, modified).unwrap()
    };
    assert_eq!(build(), build());
}

#[test]
fn spine_follows_depth_first_toc_order() {
    let seg = segment(MANUSCRIPT);
    let meta = EpubMetadata::new(Uuid::new_v4(), "我的小说");
    let modified = chrono::Utc.with_ymd_and_hms(2024, 3, 3, 0, 0, 0).unwrap();
    let epub = assembler::assemble(&seg.root, &meta, None, modified).unwrap();

    // front matter, vol 1, ch 1, ch 2, vol 2, ch 3
    let expected = [
        "我的小说",
        "第一卷 风起",
        "第一章 少年",
        "第二章 出山",
        "第二卷 云涌",
        "第三章 入城",
    ];
    for (i, title) in expected.iter().enumerate() {
        let body = zip_member(&epub, &format!("EPUB/Text/section_{:04}.xhtml", i + 1));
        assert!(body.contains(title), "section {} missing {title}", i + 1);
    }
}

#[tokio::test]
async fn runner_finalizes_atomically_and_persists_the_index() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("library");
    let source = dir.path().join("novel.txt");
    tokio::fs::write(&source, MANUSCRIPT).await.unwrap();

    let runner = JobRunner::open(root.clone()).await.unwrap();
    let job_id = runner
        .submit_convert(ConvertRequest {
            source,
            template_id: "default".into(),
            overrides: MetadataOverrides {
                author: Some("无名氏".into()),
                ..Default::default()
            },
            cover: None,
            book_id: None,
        })
        .await
        .unwrap();

    let job = runner.wait(job_id).await.unwrap();
    assert_eq!(job.stage, JobStage::Succeeded);

    let book = runner.book(job.book_id.unwrap()).await.unwrap();
    assert_eq!(book.title, "我的小说");
    assert_eq!(book.author.as_deref(), Some("无名氏"));

    // No leftover temp file next to the finalized archive
    assert!(book.path.exists());
    assert!(!book.path.with_extension("part").exists());

    // The archive on disk is a readable EPUB with the derived title
    let bytes = tokio::fs::read(&book.path).await.unwrap();
    let summary = patcher::read_summary(&bytes).unwrap();
    assert_eq!(summary.title.as_deref(), Some("我的小说"));

    // Index is on disk too
    let index = tokio::fs::read_to_string(root.join("library.json")).await.unwrap();
    assert!(index.contains("我的小说"));
}
