/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! State shared between the writer and the verifier: the registry of live
//! files, the directory tree with its active set, and the run counters.
//! One mutex guards it all; the lock order is always this lock first, then
//! a per-file lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::Config;
use crate::file::FileRecord;
use crate::stats::Stats;
use crate::tree::{DirIndex, DirTree};

pub struct State {
    pub tree: DirTree,
    /// Directories with spare file slots at the current level
    pub active: Vec<DirIndex>,
    /// Live files, in creation order. The writer appends, the space
    /// governor erases; erases shift later indices left by one.
    pub registry: Vec<Arc<FileRecord>>,
    pub stats: Stats,
    /// Registry index of the verifier's most recent read
    pub last_read_index: usize,
    /// Latched once usage first forces a deletion (write/delete mode)
    pub was_full: bool,
    /// Current tree level, maintained by the writer
    pub level: u32,
}

impl State {
    /// Ordered erase, so the verifier's position keeps its meaning. The
    /// index is looked up by identity since earlier erases may have shifted
    /// it.
    pub fn remove_file(&mut self, file: &Arc<FileRecord>) -> Option<Arc<FileRecord>> {
        let index = self
            .registry
            .iter()
            .position(|f| Arc::ptr_eq(f, file))?;
        let removed = self.registry.remove(index);
        self.tree.remove_file(removed.dir);
        Some(removed)
    }
}

pub struct Shared {
    pub config: Config,
    state: Mutex<State>,
    error: AtomicBool,
    terminating: AtomicBool,
}

impl Shared {
    pub fn new(config: Config, tree: DirTree) -> Self {
        let active = tree.all();
        let state = State {
            tree,
            active,
            registry: Vec::new(),
            stats: Stats::start(chrono::Local::now().timestamp()),
            last_read_index: 0,
            was_full: false,
            level: 1,
        };
        Self {
            config,
            state: Mutex::new(state),
            error: AtomicBool::new(false),
            terminating: AtomicBool::new(false),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record a verification failure. With error-stop configured this also
    /// stops the run.
    pub fn flag_error(&self) {
        self.error.store(true, Ordering::SeqCst);
        if self.config.error_stop {
            self.terminating.store(true, Ordering::SeqCst);
        }
    }

    /// Record an unrecoverable worker failure and stop the run.
    pub fn flag_fatal(&self) {
        self.error.store(true, Ordering::SeqCst);
        self.terminating.store(true, Ordering::SeqCst);
    }

    pub fn has_error(&self) -> bool {
        self.error.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.terminating.store(true, Ordering::SeqCst);
    }

    pub fn stopping(&self) -> bool {
        self.terminating.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tuning;
    use crate::path::LocalPath;
    use rand::thread_rng;

    fn test_config() -> Config {
        Config {
            percent: 99,
            timeout: -1,
            immediate_check: false,
            max_files: None,
            min_bits: 10,
            max_bits: 10,
            error_stop: false,
            direct_io: false,
            keep_fs: false,
            tuning: Tuning::default(),
        }
    }

    fn shared_with_files(tmp: &tempfile::TempDir, count: usize) -> Shared {
        let root = LocalPath::new(&tmp.path().join("root"));
        let mut tree = DirTree::create_root(root).unwrap();
        tree.grow_level(1).unwrap();
        let shared = Shared::new(test_config(), tree);
        {
            let mut st = shared.lock();
            let dir = crate::tree::DirIndex(1);
            let dir_path = st.tree.path(dir).clone();
            for _ in 0..count {
                let file = Arc::new(
                    FileRecord::create(&mut thread_rng(), dir, &dir_path, 1024).unwrap(),
                );
                st.tree.add_file(dir);
                st.registry.push(file);
            }
        }
        shared
    }

    #[test]
    fn test_remove_file_shifts_left() {
        let tmp = tempfile::tempdir().unwrap();
        let shared = shared_with_files(&tmp, 4);
        let mut st = shared.lock();
        let second = st.registry[1].clone();
        let third = st.registry[2].clone();
        let removed = st.remove_file(&second).unwrap();
        assert!(Arc::ptr_eq(&removed, &second));
        assert_eq!(3, st.registry.len());
        assert!(Arc::ptr_eq(&st.registry[1], &third));
        // removing again finds nothing
        assert!(st.remove_file(&second).is_none());
    }

    #[test]
    fn test_remove_file_updates_dir_count() {
        let tmp = tempfile::tempdir().unwrap();
        let shared = shared_with_files(&tmp, 3);
        let mut st = shared.lock();
        let dir = st.registry[0].dir;
        assert_eq!(3, st.tree.num_files(dir));
        let first = st.registry[0].clone();
        st.remove_file(&first).unwrap();
        assert_eq!(2, st.tree.num_files(dir));
    }

    #[test]
    fn test_error_stop_terminates() {
        let tmp = tempfile::tempdir().unwrap();
        let root = LocalPath::new(&tmp.path().join("root"));
        let tree = DirTree::create_root(root).unwrap();
        let mut config = test_config();
        config.error_stop = true;
        let shared = Shared::new(config, tree);
        assert!(!shared.stopping());
        shared.flag_error();
        assert!(shared.has_error());
        assert!(shared.stopping());
    }

    #[test]
    fn test_error_without_stop_keeps_running() {
        let tmp = tempfile::tempdir().unwrap();
        let root = LocalPath::new(&tmp.path().join("root"));
        let tree = DirTree::create_root(root).unwrap();
        let shared = Shared::new(test_config(), tree);
        shared.flag_error();
        assert!(shared.has_error());
        assert!(!shared.stopping());
    }
}
