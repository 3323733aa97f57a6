/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Writer worker: creates files under random active directories, advances
//! the tree level when every directory is full, and paces itself against
//! the verifier.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use log::info;
use rand::{thread_rng, Rng};

use crate::file::{CheckOutcome, FileRecord};
use crate::governor::{Flow, SpaceGovernor};
use crate::registry::Shared;

pub fn run(shared: Arc<Shared>, governor: SpaceGovernor) -> anyhow::Result<()> {
    let cfg = &shared.config;
    let mut rng = thread_rng();
    let start = Instant::now();
    let mut level: u32 = 1;
    let mut max_files_per_dir: u32 = 1;

    {
        let mut st = shared.lock();
        st.tree.grow_level(1)?;
        st.active = st.tree.all();
        st.level = 1;
    }

    while !(shared.has_error() || shared.stopping()) {
        let (dir, dir_path) = {
            let st = shared.lock();
            let index = rng.gen_range(0..st.active.len());
            let dir = st.active[index];
            (dir, st.tree.path(dir).clone())
        };

        let bits = rng.gen_range(cfg.min_bits..=cfg.max_bits);
        let size = (1u64 << bits) + rng.gen_range(0..4096);
        let file = Arc::new(FileRecord::create(&mut rng, dir, &dir_path, size)?);

        if governor.free_space(&shared, file.size)? == Flow::Exit {
            // the placeholder never reached the registry
            file.unlink()?;
            break;
        }

        let outcome = file.write(&mut file.lock(), cfg)?;
        if let CheckOutcome::Corrupt(_) = outcome {
            shared.flag_error();
        }

        {
            let mut st = shared.lock();
            st.tree.add_file(dir);
            st.registry.push(file.clone());
            st.stats.now.write += file.size;
            st.stats.now.num_files += 1;
            st.stats.num_written += 1;
            if u32::from(st.tree.num_files(dir)) >= max_files_per_dir {
                st.active.retain(|d| *d != dir);
            }
            if st.active.is_empty() {
                level += 1;
                max_files_per_dir = level * level;
                info!("Going to level {}", level);
                st.tree.grow_level(level)?;
                st.active = st.tree.all();
                st.level = level;
            }
        }

        emit_stats(&shared);

        if cfg.timeout >= 0 && start.elapsed().as_secs() >= cfg.timeout as u64 {
            info!("timeout reached, terminating");
            shared.request_stop();
        }

        pace(&shared);
    }
    Ok(())
}

fn emit_stats(shared: &Shared) {
    let interval = shared.config.tuning.stats_interval as i64;
    let mut st = shared.lock();
    st.stats.now.time = Local::now().timestamp();
    if st.stats.now.time - st.stats.old.time > interval {
        println!("{}", st.stats.format_line());
        st.stats.old = st.stats.now;
    }
}

/// Stay ahead of the verifier, but not too far: before the volume first
/// fills, at most `write_ahead_fill` files; in write/delete mode, at most
/// `write_ahead_steady`, so reads hit evicted pages instead of the cache.
fn pace(shared: &Shared) {
    loop {
        if shared.stopping() {
            return;
        }
        let wait = {
            let st = shared.lock();
            if !st.was_full {
                st.last_read_index + shared.config.tuning.write_ahead_fill < st.registry.len()
            } else {
                st.stats.num_written
                    > st.stats.num_read + shared.config.tuning.write_ahead_steady as u64
            }
        };
        if !wait {
            return;
        }
        thread::sleep(Duration::from_secs(1));
    }
}
