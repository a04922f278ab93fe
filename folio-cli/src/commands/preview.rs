//! Preview command implementation

use anyhow::{Context, Result};
use folio_core::{RuleTemplateStore, Segmenter, SkipReason, TocNode};
use std::fs;
use std::path::Path;

/// Show the TOC tree a template would produce, without writing anything
pub fn preview(library: &str, input: &str, template: &str, show_skipped: bool) -> Result<()> {
    let store = RuleTemplateStore::open(Path::new(library).join("rules"))
        .with_context(|| format!("Failed to open rule templates under {library}"))?;
    let (_, rules) = store
        .get(template)
        .with_context(|| format!("Failed to load template '{template}'"))?;

    let raw = fs::read(input).with_context(|| format!("Failed to read input file: {input}"))?;
    let seg = Segmenter::new()
        .segment(&raw, &rules)
        .with_context(|| format!("Failed to segment {input}"))?;

    if let Some(title) = &seg.derived_title {
        println!("Derived title: {title}");
    }
    if !seg.root.content.is_empty() {
        println!("Front matter: {} line(s)", seg.root.content.len());
    }

    for child in &seg.root.children {
        print_node(child, &rules, 0);
    }

    println!(
        "{} node(s), {} skipped line(s)",
        seg.root.node_count() - 1,
        seg.skipped.len()
    );
    if show_skipped {
        for line in &seg.skipped {
            let reason = match line.reason {
                SkipReason::NoiseDrop => "noise",
                SkipReason::Empty => "empty",
            };
            println!("  {:>6} [{reason}] {}", line.line_number, line.raw_text);
        }
    }

    Ok(())
}

fn print_node(node: &TocNode, rules: &folio_core::RuleSet, indent: usize) {
    let level = rules.level_name(node.level - 1).unwrap_or("section");
    let (start, end) = node.source_line_range;
    println!(
        "{}{} [{level}] (lines {start}..{end}, {} content line(s))",
        "  ".repeat(indent),
        node.title,
        node.content.len()
    );
    for child in &node.children {
        print_node(child, rules, indent + 1);
    }
}
