//! Integration tests for the Folio CLI

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const MANUSCRIPT: &str = "\
我的小说
第一卷 风起
第一章 少年
他推开门。
第二章 出山
山路很长。
";

fn write_manuscript(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("novel.txt");
    fs::write(&path, MANUSCRIPT).expect("Failed to write test file");
    path
}

fn folio() -> Command {
    Command::cargo_bin("folio-cli").unwrap()
}

#[test]
fn test_help() {
    folio()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("convert"))
        .stdout(predicate::str::contains("preview"))
        .stdout(predicate::str::contains("patch"))
        .stdout(predicate::str::contains("import"))
        .stdout(predicate::str::contains("info"))
        .stdout(predicate::str::contains("list"));
}

#[test]
fn test_version() {
    folio()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("folio"));
}

#[test]
fn test_convert_help() {
    folio()
        .args(["convert", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Convert a plain-text manuscript"))
        .stdout(predicate::str::contains("--template"))
        .stdout(predicate::str::contains("--cover"));
}

#[test]
fn test_preview_prints_the_toc_tree() {
    let dir = TempDir::new().unwrap();
    let input = write_manuscript(&dir);
    let library = dir.path().join("lib");

    folio()
        .args(["--library", library.to_str().unwrap(), "preview"])
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("Derived title: 我的小说"))
        .stdout(predicate::str::contains("第一卷 风起 [volume]"))
        .stdout(predicate::str::contains("第一章 少年 [chapter]"));
}

#[test]
fn test_convert_then_list_and_info() {
    let dir = TempDir::new().unwrap();
    let input = write_manuscript(&dir);
    let library = dir.path().join("lib");
    let lib = library.to_str().unwrap();

    folio()
        .args(["--library", lib, "convert"])
        .arg(&input)
        .args(["--author", "无名氏"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Converted '我的小说'"));

    folio()
        .args(["--library", lib, "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("我的小说"))
        .stdout(predicate::str::contains("synced"));

    // The archive lands under <library>/books
    let books: Vec<_> = fs::read_dir(library.join("books"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(books.len(), 1);

    folio()
        .args(["info", books[0].to_str().unwrap(), "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"title\": \"我的小说\""))
        .stdout(predicate::str::contains("\"author\": \"无名氏\""));
}

#[test]
fn test_patch_updates_title() {
    let dir = TempDir::new().unwrap();
    let input = write_manuscript(&dir);
    let library = dir.path().join("lib");
    let lib = library.to_str().unwrap();

    let output = folio()
        .args(["--library", lib, "convert"])
        .arg(&input)
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let book_id = stdout
        .lines()
        .find_map(|l| l.strip_prefix("Book id: "))
        .expect("convert output should name the book id");

    folio()
        .args(["--library", lib, "patch", book_id, "--title", "新名字"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Patched '新名字'"));

    folio()
        .args(["--library", lib, "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("新名字"));
}

#[test]
fn test_convert_missing_input_fails() {
    let dir = TempDir::new().unwrap();
    let library = dir.path().join("lib");

    folio()
        .args(["--library", library.to_str().unwrap(), "convert", "no-such-file.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no-such-file.txt"));
}

#[test]
fn test_list_unknown_status_rejected() {
    let dir = TempDir::new().unwrap();
    let library = dir.path().join("lib");

    folio()
        .args(["--library", library.to_str().unwrap(), "list", "--status", "bogus"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown status"));
}

#[test]
fn test_info_on_non_epub_fails() {
    let dir = TempDir::new().unwrap();
    let input = write_manuscript(&dir);

    folio()
        .arg("info")
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read metadata"));
}
