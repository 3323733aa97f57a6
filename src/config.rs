/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::args::Args;

/// Tuning knobs, loadable from a TOML file. Defaults match the values the
/// tool has always shipped with.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Tuning {
    /// Seconds between stats lines
    pub stats_interval: u64,
    /// Skip the unlink-time verification once a file was checked this many times
    pub unlink_check_threshold: u32,
    /// How many files the writer may run ahead of the verifier before the
    /// volume first fills up
    pub write_ahead_fill: usize,
    /// How many unread files the writer tolerates once in write/delete mode
    pub write_ahead_steady: usize,
    /// Distance the verifier keeps behind the registry tail before the
    /// volume first fills up
    pub verifier_gap: usize,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            stats_interval: 60,
            unlink_check_threshold: 10,
            write_ahead_fill: 100,
            write_ahead_steady: 20,
            verifier_gap: 20,
        }
    }
}

impl Tuning {
    /// Load from a TOML file; a missing file means all defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration file '{}'", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("failed to parse configuration at '{}'", path.display()))
    }
}

/// Immutable run configuration, built once in `main` and shared by the
/// workers.
#[derive(Clone, Debug)]
pub struct Config {
    /// Fill-level goal, percent of total filesystem size (1..=99)
    pub percent: u64,
    /// Wall-clock limit in seconds, negative means run forever
    pub timeout: i64,
    /// Verify every file right after writing it
    pub immediate_check: bool,
    /// Soft ceiling on the number of live files
    pub max_files: Option<usize>,
    /// Smallest file size exponent (2^min_bits bytes)
    pub min_bits: u32,
    /// Largest file size exponent (2^max_bits bytes)
    pub max_bits: u32,
    /// Stop at the first verification failure
    pub error_stop: bool,
    /// Open files with O_DIRECT half of the time
    pub direct_io: bool,
    /// Keep the test tree after a clean run
    pub keep_fs: bool,
    pub tuning: Tuning,
}

impl Config {
    pub fn from_args(args: &Args) -> anyhow::Result<Self> {
        if args.min_bits > args.max_bits {
            bail!(
                "min-bits ({}) must not exceed max-bits ({})",
                args.min_bits,
                args.max_bits
            );
        }
        if args.max_bits > 40 {
            bail!("max-bits ({}) is unreasonably large", args.max_bits);
        }
        let tuning = Tuning::load(Path::new(&args.config_path))?;
        Ok(Self {
            percent: args.percent,
            timeout: args.timeout,
            immediate_check: args.immediate,
            max_files: args.max_files,
            min_bits: args.min_bits,
            max_bits: args.max_bits,
            error_stop: args.error_stop,
            direct_io: args.direct_io,
            keep_fs: args.keep_fs,
            tuning,
        })
    }
}
