/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Run orchestration: working-directory setup, the startup banner, worker
//! spawn/join and the final teardown.

use std::fs;
use std::io;
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{bail, Context};
use chrono::Local;
use log::{error, info, warn};

use crate::config::Config;
use crate::fs_wrap;
use crate::governor::SpaceGovernor;
use crate::path::LocalPath;
use crate::registry::Shared;
use crate::tree::DirTree;
use crate::{verifier, writer};

pub struct Runner {
    shared: Arc<Shared>,
    governor: SpaceGovernor,
}

/// Summary of a finished run.
pub struct RunReport {
    /// No corruption and no worker failure
    pub clean: bool,
    /// Tree level reached by the writer
    pub level: u32,
    /// Files created over the whole run
    pub files_written: u64,
}

impl Runner {
    /// Validate the test directory, create the per-run working dir and fix
    /// the space goal from the volume size at startup.
    pub fn create(config: Config, testdir: &Path) -> anyhow::Result<Self> {
        let meta = fs::metadata(testdir)
            .with_context(|| format!("cannot access test directory '{}'", testdir.display()))?;
        if !meta.is_dir() {
            bail!("'{}' is not a directory", testdir.display());
        }

        let root = LocalPath::test_root(testdir, process::id());
        println!("fstress v{}", env!("CARGO_PKG_VERSION"));
        println!("Directory           : {}", root);
        println!("Goal percentage used: {}", config.percent);

        let tree = DirTree::create_root(root.clone())?;
        let usage = fs_wrap::statvfs(root.as_ref())?;
        println!("Filesystem size     : {}", usage.size);
        println!("Filesystem free     : {}", usage.free);
        println!("Filesystem used     : {:.1}", usage.used_percent());

        let governor = SpaceGovernor::create(root, &usage, &config)?;
        let shared = Arc::new(Shared::new(config, tree));
        Ok(Self { shared, governor })
    }

    pub fn run(self) -> anyhow::Result<RunReport> {
        println!(
            "Starting test       : {}",
            Local::now().format("%a %b %e %H:%M:%S %Y")
        );

        let Self { shared, governor } = self;
        let writer = {
            let shared = shared.clone();
            thread::Builder::new()
                .name(String::from("writer"))
                .spawn(move || writer::run(shared, governor))
                .with_context(|| "failed to spawn writer")?
        };
        let verifier = {
            let shared = shared.clone();
            thread::Builder::new()
                .name(String::from("verifier"))
                .spawn(move || verifier::run(shared))
                .with_context(|| "failed to spawn verifier")?
        };

        join_worker(&shared, writer, "writer");
        join_worker(&shared, verifier, "verifier");

        let clean = !shared.has_error();
        if !clean {
            warn!("errors were detected, leaving the test tree in place");
        } else if shared.config.keep_fs {
            info!("keeping the test tree as requested");
        } else {
            teardown(&shared)?;
        }

        let st = shared.lock();
        let report = RunReport {
            clean,
            level: st.level,
            files_written: st.stats.now.num_files,
        };
        drop(st);
        if clean {
            info!("Done.");
        }
        Ok(report)
    }
}

/// Remove every registry file, then the directory tree children-first.
fn teardown(shared: &Shared) -> anyhow::Result<()> {
    let mut st = shared.lock();
    let files: Vec<_> = st.registry.drain(..).collect();
    for file in files {
        file.unlink()?;
    }
    for dir in st.tree.dirs().iter().rev() {
        match fs::remove_dir(&dir.path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("failed to remove dir '{}'", dir.path))
            }
        }
    }
    Ok(())
}

fn join_worker(shared: &Shared, handle: JoinHandle<anyhow::Result<()>>, name: &str) {
    match handle.join() {
        Ok(Ok(())) => info!("{} finished", name),
        Ok(Err(err)) => {
            error!("{} failed: {:?}", name, err);
            shared.flag_fatal();
        }
        Err(_) => {
            error!("{} panicked", name);
            shared.flag_fatal();
        }
    }
}
