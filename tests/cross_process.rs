//! The cross-process writer/reader boundary (spec scenario 1): a writer in
//! this process appends values, and a reader opened in a genuinely separate
//! OS process observes them without ever reopening except to pick up growth
//! the writer made after the reader's own view was mapped.
//!
//! The "separate process" is this same test binary re-invoked via
//! `std::process::Command`, filtered down to this one test by name, with the
//! data path (and an expected count) passed through the environment. The
//! child takes the early-return branch at the top and never recurses.

use std::env;
use std::process::Command;

use tsmmap::{tags, List};

const PATH_VAR: &str = "TSMMAP_CROSS_PROCESS_PATH";
const EXPECT_COUNT_VAR: &str = "TSMMAP_CROSS_PROCESS_EXPECT_COUNT";

#[test]
fn reader_in_separate_process_observes_writer_growth() {
    if let Ok(path) = env::var(PATH_VAR) {
        run_as_reader_child(&path);
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cross_process.bin");

    let mut writer: List<i64> = List::create_writer(&path, 0, tags::I64, 4).unwrap();
    writer.append(1).unwrap();
    writer.append(2).unwrap();
    writer.append(3).unwrap();

    spawn_reader_child(&path, 3);

    writer.append(4).unwrap();

    spawn_reader_child(&path, 4);
}

fn spawn_reader_child(path: &std::path::Path, expect_count: u64) {
    let exe = env::current_exe().expect("test binary path");
    let status = Command::new(exe)
        .arg("--exact")
        .arg("reader_in_separate_process_observes_writer_growth")
        .env(PATH_VAR, path)
        .env(EXPECT_COUNT_VAR, expect_count.to_string())
        .status()
        .expect("failed to spawn reader subprocess");

    assert!(
        status.success(),
        "reader subprocess (expecting count {}) reported a mismatch",
        expect_count
    );
}

fn run_as_reader_child(path: &str) {
    let expect_count: u64 = env::var(EXPECT_COUNT_VAR)
        .expect("expected count env var")
        .parse()
        .expect("expected count is a u64");

    let reader: List<i64> = List::open_reader(path.as_ref(), 0).expect("reader open failed");
    assert_eq!(reader.count(), expect_count);
    for i in 0..3.min(expect_count) {
        assert_eq!(reader.get(i).unwrap(), i as i64 + 1);
    }
    if expect_count >= 4 {
        assert_eq!(reader.get(3).unwrap(), 4);
    }
}
