/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Space governor: keeps the volume at the configured fill level by
//! unlinking randomly chosen registry files before the writer places a new
//! one. Runs on the writer thread.

use anyhow::bail;
use log::info;
use rand::{thread_rng, Rng};

use crate::config::Config;
use crate::file::CheckOutcome;
use crate::fs_wrap::{self, FsUsage};
use crate::path::LocalPath;
use crate::registry::Shared;

/// Whether the writer should keep going after a governor pass.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct SpaceGovernor {
    root: LocalPath,
    /// Target bytes used on the volume, fixed at startup
    goal_bytes: u64,
    max_files: Option<usize>,
    unlink_check_threshold: u32,
}

impl SpaceGovernor {
    /// Fix the goal from the startup volume size. The tool needs headroom:
    /// a volume already above the goal is refused.
    pub fn create(root: LocalPath, usage: &FsUsage, config: &Config) -> anyhow::Result<Self> {
        let goal_bytes = usage.size * config.percent / 100;
        if usage.used() >= goal_bytes {
            bail!(
                "filesystem already above the {}% usage goal ({:.1}% used)",
                config.percent,
                usage.used_percent()
            );
        }
        Ok(Self::new(root, goal_bytes, config))
    }

    pub fn new(root: LocalPath, goal_bytes: u64, config: &Config) -> Self {
        Self {
            root,
            goal_bytes,
            max_files: config.max_files,
            unlink_check_threshold: config.tuning.unlink_check_threshold,
        }
    }

    /// Make room for `projected` bytes about to be written, deleting random
    /// files while projected usage stays above the goal or the registry
    /// exceeds the file cap. Victims that were seldom checked get one last
    /// verification before they go.
    pub fn free_space(&self, shared: &Shared, projected: u64) -> anyhow::Result<Flow> {
        let mut rng = thread_rng();
        let mut usage = fs_wrap::statvfs(self.root.as_ref())?;
        loop {
            if shared.has_error() || shared.stopping() {
                return Ok(Flow::Exit);
            }
            let over_goal = usage.used() + projected > self.goal_bytes;
            let (len, over_cap) = {
                let st = shared.lock();
                let len = st.registry.len();
                (len, self.max_files.map_or(false, |cap| len >= cap))
            };
            if !(over_goal || over_cap) || len <= 2 {
                return Ok(Flow::Continue);
            }
            if over_goal {
                self.enter_steady_state(shared);
            }

            let file = {
                let st = shared.lock();
                let index = rng.gen_range(0..st.registry.len());
                st.registry[index].clone()
            };
            // busy files belong to the verifier right now; pick another
            let Some(mut fst) = file.try_lock() else {
                continue;
            };
            if fst.has_error {
                // corruption evidence is never deleted
                continue;
            }
            fst.in_delete = true;

            if fst.num_checks < self.unlink_check_threshold {
                match file.verify(&mut fst, &shared.config)? {
                    CheckOutcome::Corrupt(_) => {
                        shared.flag_error();
                        return Ok(Flow::Exit);
                    }
                    CheckOutcome::Passed => {
                        let mut st = shared.lock();
                        st.stats.now.read += file.size;
                    }
                }
            }

            {
                let mut st = shared.lock();
                let _ = st.remove_file(&file);
            }
            file.unlink()?;
            drop(fst);

            usage = fs_wrap::statvfs(self.root.as_ref())?;
        }
    }

    fn enter_steady_state(&self, shared: &Shared) {
        let mut st = shared.lock();
        if !st.was_full {
            st.was_full = true;
            info!("Going into write/delete mode");
        }
    }
}
