#![cfg(unix)]

use std::path::Path;

use predicates::prelude::*;

const SCRAPER: &str = r#"#!/bin/sh
# args: <novel_id> <chapter_no>
n="$2"
if [ "$n" -gt 3 ]; then
  echo '{"status":404,"error":"chapter not found"}'
  exit 0
fi
echo "fetching $1 $n" >&2
printf '{"status":200,"chapter_no":"%s","title":" Chapter %s ","body":"<p>Text of chapter %s</p>"}\n' "$n" "$n" "$n"
"#;

fn chapterimport(data_dir: &Path, scraper: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("chapterimport");
    cmd.env("CHAPTERIMPORT_DATA_DIR", data_dir)
        .env("CHAPTERIMPORT_SCRAPER_PROGRAM", "sh")
        .env("CHAPTERIMPORT_SCRAPER_ARGS", scraper)
        .env_remove("CHAPTERIMPORT_SCRAPER_DIR")
        .env_remove("CHAPTERIMPORT_SOURCE_URL_TEMPLATE")
        .env_remove("CHAPTERIMPORT_WORKERS")
        .env_remove("CHAPTERIMPORT_ON_PERSIST_FAILURE");
    cmd
}

fn setup() -> (tempfile::TempDir, std::path::PathBuf, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("catalog");
    let scraper = dir.path().join("scraper.sh");
    std::fs::write(&scraper, SCRAPER).unwrap();
    (dir, data_dir, scraper)
}

#[test]
fn import_downloads_then_skips_on_rerun() {
    let (_dir, data_dir, scraper) = setup();

    chapterimport(&data_dir, &scraper)
        .args(["novel", "add", "--id", "Test Novel", "--latest-chapter", "5"])
        .assert()
        .success();
    assert!(data_dir.join("novels/test-novel/novel.json").is_file());

    chapterimport(&data_dir, &scraper)
        .args(["import", "--novel-id", "test-novel", "--workers", "2"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("event: status\n"))
        .stdout(predicate::str::contains(
            "event: complete\ndata: all 5 chapters processed: 3 downloaded, 0 skipped, 0 failed, 2 unavailable\n",
        ))
        .stdout(predicate::str::contains("event: error").not());

    let chapter: serde_json::Value = serde_json::from_slice(
        &std::fs::read(data_dir.join("novels/test-novel/chapters/2.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(chapter["chapter_number"], 2);
    assert_eq!(chapter["title"], "Chapter 2");
    assert_eq!(chapter["body"].as_str().unwrap().trim(), "Text of chapter 2");
    assert_eq!(
        chapter["source_url"],
        "https://www.lightnovelworld.co/novel/test-novel/chapter-2"
    );
    assert!(!data_dir.join("novels/test-novel/chapters/4.json").exists());

    chapterimport(&data_dir, &scraper)
        .args(["import", "--novel-id", "test-novel"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "processed: 0 downloaded, 3 skipped, 0 failed, 2 unavailable",
        ));

    chapterimport(&data_dir, &scraper)
        .args(["novel", "show", "--id", "test-novel"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"stored_chapters\": 3"))
        .stdout(predicate::str::contains("\"missing_chapters\": 2"));
}

#[test]
fn import_of_unknown_novel_fails_with_error_event() {
    let (_dir, data_dir, scraper) = setup();

    chapterimport(&data_dir, &scraper)
        .args(["import", "--novel-id", "missing"])
        .assert()
        .failure()
        .stdout("event: error\ndata: novel not found: missing\n\n")
        .stderr(predicate::str::contains("import rejected"));
}

#[test]
fn fetch_prints_a_single_chapter() {
    let (_dir, data_dir, scraper) = setup();

    chapterimport(&data_dir, &scraper)
        .args(["fetch", "--novel-id", "test-novel", "--chapter", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"title\": \"Chapter 1\""))
        .stdout(predicate::str::contains("Text of chapter 1"))
        .stdout(predicate::str::contains("<p>").not());

    chapterimport(&data_dir, &scraper)
        .args(["fetch", "--novel-id", "test-novel", "--chapter", "9"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("chapter not found"));
}

#[test]
fn rust_log_debug_emits_debug_line_to_stderr() {
    let (_dir, data_dir, scraper) = setup();

    chapterimport(&data_dir, &scraper)
        .env("RUST_LOG", "debug")
        .args(["novel", "add", "--id", "x", "--latest-chapter", "1"])
        .assert()
        .success()
        .stderr(predicate::str::contains("parsed cli"));
}
