/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use chrono::{Local, TimeZone};

pub const MEGA: u64 = 1024 * 1024;
pub const GIGA: u64 = 1024 * 1024 * 1024;

/// Byte and file counters at one point in time.
#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
    /// Unix time of the snapshot
    pub time: i64,
    /// Bytes written since start
    pub write: u64,
    /// Bytes read back since start
    pub read: u64,
    /// Files created since start
    pub num_files: u64,
}

/// Shared run statistics; protected by the global state lock.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub now: Counters,
    pub old: Counters,
    /// Files the writer has completed
    pub num_written: u64,
    /// Files the verifier has completed
    pub num_read: u64,
}

impl Stats {
    pub fn start(time: i64) -> Self {
        let counters = Counters {
            time,
            ..Default::default()
        };
        Self {
            now: counters,
            old: counters,
            num_written: 0,
            num_read: 0,
        }
    }

    /// The periodic stats line. `now.time` must be ahead of `old.time`.
    pub fn format_line(&self) -> String {
        let dt = (self.now.time - self.old.time).max(1) as f64;
        let write_rate = (self.now.write - self.old.write) as f64 / dt / MEGA as f64;
        let read_rate = (self.now.read - self.old.read) as f64 / dt / MEGA as f64;
        let file_rate = (self.now.num_files - self.old.num_files) as f64 / dt;
        let ctime = match Local.timestamp_opt(self.now.time, 0) {
            chrono::LocalResult::Single(t) => t.format("%a %b %e %H:%M:%S %Y").to_string(),
            _ => String::from("?"),
        };
        format!(
            "{} write: {} GiB [{:.2} MiB/s] read: {} GiB [{:.2} MiB/s] Files: {} [{:.2} files/s] # {}  idx write: {}  idx read: {}",
            self.now.time,
            self.now.write / GIGA,
            write_rate,
            self.now.read / GIGA,
            read_rate,
            self.now.num_files,
            file_rate,
            ctime,
            self.num_written,
            self.num_read,
        )
    }
}
