/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! End-to-end scenarios against a scratch directory. Small file sizes and
//! short timeouts keep the runs in CI territory; tmpfs is preferred when
//! the host has one.

use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fstress::config::{Config, Tuning};
use fstress::file::FileRecord;
use fstress::path::LocalPath;
use fstress::registry::Shared;
use fstress::runner::Runner;
use fstress::tree::{DirIndex, DirTree};
use fstress::verifier;
use rand::thread_rng;
use walkdir::WalkDir;

fn scratch_dir() -> tempfile::TempDir {
    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        if let Ok(dir) = tempfile::tempdir_in(shm) {
            return dir;
        }
    }
    tempfile::tempdir().unwrap()
}

fn small_config(timeout: i64) -> Config {
    Config {
        percent: 99,
        timeout,
        immediate_check: false,
        max_files: None,
        min_bits: 10,
        max_bits: 12,
        error_stop: false,
        direct_io: false,
        keep_fs: false,
        tuning: Tuning::default(),
    }
}

fn working_dir(parent: &Path) -> PathBuf {
    parent.join(format!("fstest.{}", std::process::id()))
}

#[test]
fn test_happy_path_clean_run_removes_tree() {
    let tmp = scratch_dir();
    let runner = Runner::create(small_config(3), tmp.path()).unwrap();
    let report = runner.run().unwrap();
    assert!(report.clean);
    assert!(report.files_written >= 30);
    // teardown emptied the registry and removed the whole tree
    assert!(!working_dir(tmp.path()).exists());
}

#[test]
fn test_level_advancement_and_dir_caps() {
    let tmp = scratch_dir();
    let mut config = small_config(5);
    config.min_bits = 10;
    config.max_bits = 10;
    config.keep_fs = true;
    let runner = Runner::create(config, tmp.path()).unwrap();
    let report = runner.run().unwrap();
    assert!(report.clean);
    assert!(report.files_written >= 200, "only {} files", report.files_written);
    assert!(report.level >= 3, "only reached level {}", report.level);

    let root = working_dir(tmp.path());
    assert!(root.join("d02").is_dir());

    // no directory may hold more files than the final level's cap
    let cap = (report.level * report.level) as usize;
    for entry in WalkDir::new(&root).into_iter().map(Result::unwrap) {
        if entry.file_type().is_dir() {
            let files = std::fs::read_dir(entry.path())
                .unwrap()
                .map(Result::unwrap)
                .filter(|e| e.file_type().unwrap().is_file())
                .count();
            assert!(files <= cap, "{} files in {}", files, entry.path().display());
        }
    }
}

#[test]
fn test_corruption_stops_run_and_preserves_evidence() {
    let tmp = scratch_dir();
    let mut config = small_config(30);
    config.min_bits = 13;
    config.max_bits = 13;
    config.error_stop = true;
    let runner = Runner::create(config, tmp.path()).unwrap();
    let root = working_dir(tmp.path());

    let handle = thread::spawn(move || runner.run().unwrap());

    // flip a byte in every settled file until the verifier notices
    let deadline = Instant::now() + Duration::from_secs(25);
    while Instant::now() < deadline && !handle.is_finished() {
        for entry in WalkDir::new(&root).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(file) = OpenOptions::new().write(true).open(entry.path()) {
                if file.metadata().map(|m| m.len() > 4096).unwrap_or(false) {
                    let _ = file.write_at(&[0xff], 4096);
                }
            }
        }
        thread::sleep(Duration::from_millis(200));
    }

    let report = handle.join().unwrap();
    assert!(!report.clean);
    // the tree is left in place for inspection
    assert!(root.exists());
    let leftover = WalkDir::new(&root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .count();
    assert!(leftover > 0);
}

#[test]
fn test_registry_erase_under_running_verifier() {
    let tmp = scratch_dir();
    let root = LocalPath::new(&tmp.path().join("root"));
    let mut tree = DirTree::create_root(root).unwrap();
    tree.grow_level(1).unwrap();
    let shared = Arc::new(Shared::new(small_config(-1), tree));

    {
        let mut st = shared.lock();
        let dir = DirIndex(1);
        let dir_path = st.tree.path(dir).clone();
        for _ in 0..30 {
            let file =
                Arc::new(FileRecord::create(&mut thread_rng(), dir, &dir_path, 1024).unwrap());
            file.write(&mut file.lock(), &shared.config).unwrap();
            st.tree.add_file(dir);
            st.registry.push(file);
        }
        // steady state, the verifier wraps freely
        st.was_full = true;
    }

    let verifier_shared = shared.clone();
    let handle = thread::spawn(move || verifier::run(verifier_shared));

    // delete the head entry with the proper discipline until two remain
    loop {
        let file = {
            let st = shared.lock();
            if st.registry.len() <= 2 {
                break;
            }
            st.registry[0].clone()
        };
        let Some(mut fst) = file.try_lock() else {
            thread::sleep(Duration::from_millis(5));
            continue;
        };
        fst.in_delete = true;
        let removed = shared.lock().remove_file(&file);
        assert!(removed.is_some());
        file.unlink().unwrap();
        drop(fst);
        thread::sleep(Duration::from_millis(20));
    }

    // give the verifier time to wrap around the shrunken registry
    thread::sleep(Duration::from_millis(500));
    shared.request_stop();
    handle.join().unwrap().unwrap();

    assert!(!shared.has_error());
    let st = shared.lock();
    assert_eq!(2, st.registry.len());
    assert!(st.stats.num_read > 0);
}
