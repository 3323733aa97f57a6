/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! One file on disk: creation, content write, read-back verification and
//! removal. All content is the file's pattern tiled over its length, so
//! verification needs no bookkeeping beyond the record itself.

use std::cmp::min;
use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Local};
use log::{debug, info, warn};
use rand::Rng;
use thiserror::Error;

use crate::config::Config;
use crate::fs_wrap::{self, Advice, AlignedBuf, DIRECT_IO_ALIGN};
use crate::path::LocalPath;
use crate::pattern::{self, ByteDiff, Pattern, BUF_SIZE};
use crate::tree::DirIndex;

const EIO_RETRIES: u32 = 3;

/// What a verification found.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    #[error("file smaller than expected ({got} < {want} bytes)")]
    ShortFile { got: u64, want: u64 },
    #[error("file larger than expected (data past {want} bytes)")]
    LongFile { want: u64 },
    #[error("file corruption around offset {window}")]
    Mismatch { window: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Passed,
    Corrupt(Corruption),
}

/// Mutable per-file state. Living inside the file mutex, so holding the
/// guard is holding the file lock.
#[derive(Debug, Default)]
pub struct FileState {
    /// Completed verifications
    pub num_checks: u32,
    /// A durability syscall failed; mismatches are expected, not corruption
    pub sync_failed: bool,
    /// A verification found corruption; the file is kept as evidence
    pub has_error: bool,
    /// The space governor is about to unlink this file
    pub in_delete: bool,
    /// Wall-clock time of the first write, for diagnostics
    pub create_time: Option<DateTime<Local>>,
}

pub struct FileRecord {
    pub name: String,
    pub path: LocalPath,
    pub size: u64,
    pub pattern: Pattern,
    pub dir: DirIndex,
    state: Mutex<FileState>,
}

impl FileRecord {
    /// Create the record and an empty placeholder file on disk. The name is
    /// the pattern in hex; on a name collision the pattern is redrawn.
    pub fn create(
        rng: &mut impl Rng,
        dir: DirIndex,
        dir_path: &LocalPath,
        size: u64,
    ) -> anyhow::Result<Self> {
        loop {
            let pattern = Pattern::random(rng);
            let name = pattern.name();
            let path = dir_path.join(&name);
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o600)
                .open(&path)
            {
                Ok(file) => {
                    drop(file);
                    return Ok(Self {
                        name,
                        path,
                        size,
                        pattern,
                        dir,
                        state: Mutex::new(FileState::default()),
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("failed to create file '{}'", path))
                }
            }
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, FileState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, FileState>> {
        match self.state.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::WouldBlock) => None,
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
        }
    }

    /// Write the full content and make it durable. Caller holds the state
    /// lock.
    pub fn write(&self, st: &mut FileState, cfg: &Config) -> anyhow::Result<CheckOutcome> {
        st.create_time = Some(Local::now());

        let direct = cfg.direct_io && rand::random();
        let mut opts = OpenOptions::new();
        opts.read(true).write(true);
        if direct {
            opts.custom_flags(libc::O_DIRECT);
        }
        let file = opts
            .open(&self.path)
            .with_context(|| format!("failed to open '{}' for writing", self.path))?;

        let mut buf = AlignedBuf::new(BUF_SIZE);
        self.pattern.fill(&mut buf);

        let mut direct_active = direct;
        let mut offset = 0u64;
        'write: while offset < self.size {
            let want = min(BUF_SIZE as u64, self.size - offset) as usize;
            if direct_active && want % DIRECT_IO_ALIGN != 0 {
                fs_wrap::clear_direct_io(&file)
                    .with_context(|| format!("failed to drop O_DIRECT on '{}'", self.path))?;
                direct_active = false;
            }
            let mut done = 0;
            while done < want {
                match file.write_at(&buf[done..want], offset + done as u64) {
                    Ok(n) => done += n,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) if is_write_race(&err) => {
                        info!(
                            "{}: write stopped at offset {}: {}",
                            self.path,
                            offset + done as u64,
                            err
                        );
                        st.sync_failed = true;
                        break 'write;
                    }
                    Err(err) => {
                        return Err(err)
                            .with_context(|| format!("write to '{}' failed", self.path))
                    }
                }
            }
            offset += want as u64;
        }

        if let Err(err) = file.sync_data() {
            warn!("fdatasync on '{}' failed: {}", self.path, err);
            st.sync_failed = true;
        }
        // let the kernel re-read the file from disk on later checks
        if let Err(err) = fs_wrap::fadvise(&file, Advice::DontNeed) {
            debug!("posix_fadvise on '{}' failed: {}", self.path, err);
        }

        let outcome = if cfg.immediate_check {
            self.verify_fd(st, &file)?
        } else {
            CheckOutcome::Passed
        };

        if let Err(err) = fs_wrap::close(file) {
            warn!("close of '{}' failed: {}", self.path, err);
            st.sync_failed = true;
        }
        Ok(outcome)
    }

    /// Read the file back and compare it against the tiled pattern. Caller
    /// holds the state lock.
    pub fn verify(&self, st: &mut FileState, cfg: &Config) -> anyhow::Result<CheckOutcome> {
        if st.has_error {
            // known corrupt, kept as evidence; nothing new to learn
            return Ok(CheckOutcome::Passed);
        }

        let direct = cfg.direct_io && rand::random();
        let mut opts = OpenOptions::new();
        opts.read(true);
        if direct {
            opts.custom_flags(libc::O_DIRECT);
        }
        let file = opts
            .open(&self.path)
            .with_context(|| format!("failed to open '{}' for checking", self.path))?;

        if let Err(err) = fs_wrap::fadvise(&file, Advice::NoReuse) {
            debug!("posix_fadvise on '{}' failed: {}", self.path, err);
        }
        let outcome = self.verify_fd(st, &file)?;
        if let Err(err) = fs_wrap::fadvise(&file, Advice::DontNeed) {
            debug!("posix_fadvise on '{}' failed: {}", self.path, err);
        }
        Ok(outcome)
    }

    fn verify_fd(&self, st: &mut FileState, file: &fs::File) -> anyhow::Result<CheckOutcome> {
        let mut tile = AlignedBuf::new(BUF_SIZE);
        self.pattern.fill(&mut tile);
        let mut buf = AlignedBuf::new(BUF_SIZE);

        let mut offset = 0u64;
        while offset < self.size {
            let want = min(BUF_SIZE as u64, self.size - offset) as usize;
            let got = read_full_at(file, &mut buf, offset, &self.path)?;

            let cmp = min(got, want);
            let diffs = pattern::compare(&tile[..cmp], &buf[..cmp], offset);
            if !diffs.is_empty() {
                let corruption = Corruption::Mismatch { window: offset };
                self.log_corruption(st, corruption, &diffs);
                st.has_error = true;
                if !st.sync_failed {
                    return Ok(CheckOutcome::Corrupt(corruption));
                }
                // the write already failed; scan on, mismatches are expected
            }
            if got < want {
                if st.sync_failed {
                    // the write never completed, a short file is fine
                    return Ok(CheckOutcome::Passed);
                }
                let corruption = Corruption::ShortFile {
                    got: offset + got as u64,
                    want: self.size,
                };
                self.log_corruption(st, corruption, &[]);
                st.has_error = true;
                return Ok(CheckOutcome::Corrupt(corruption));
            }
            if got > want {
                let corruption = Corruption::LongFile { want: self.size };
                self.log_corruption(st, corruption, &[]);
                st.has_error = true;
                return Ok(CheckOutcome::Corrupt(corruption));
            }
            offset += want as u64;
        }

        // a buffer-aligned file must also end exactly there
        if self.size % BUF_SIZE as u64 == 0 {
            let got = read_full_at(file, &mut buf, self.size, &self.path)?;
            if got > 0 {
                let corruption = Corruption::LongFile { want: self.size };
                self.log_corruption(st, corruption, &[]);
                st.has_error = true;
                return Ok(CheckOutcome::Corrupt(corruption));
            }
        }

        st.num_checks += 1;
        Ok(CheckOutcome::Passed)
    }

    fn log_corruption(&self, st: &FileState, corruption: Corruption, diffs: &[ByteDiff]) {
        let level = if st.sync_failed {
            log::Level::Warn
        } else {
            log::Level::Error
        };
        let created = st
            .create_time
            .map(|t| t.format("%a %b %e %H:%M:%S %Y").to_string())
            .unwrap_or_else(|| String::from("?"));
        log::log!(
            level,
            "{} in {} [pattern = {}]",
            corruption,
            self.path,
            self.pattern
        );
        log::log!(
            level,
            "after {} checks, first written {}",
            st.num_checks,
            created
        );
        for diff in diffs {
            log::log!(
                level,
                "Expected: {:02x}, got: {:02x} (pos = {})",
                diff.expected,
                diff.actual,
                diff.offset
            );
        }
    }

    /// Remove the file from disk. Caller holds the state lock and has set
    /// `in_delete`; a file that already vanished is not an error.
    pub fn unlink(&self) -> anyhow::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to delete '{}'", self.path)),
        }
    }
}

fn is_write_race(err: &io::Error) -> bool {
    // ENOSPC: another thread won the space race. EIO: an eviction on
    // network filesystems; both leave a short file behind.
    matches!(err.raw_os_error(), Some(libc::ENOSPC) | Some(libc::EIO))
}

/// `pread` until `buf` is full or EOF. Returns the number of bytes read.
fn read_full_at(
    file: &fs::File,
    buf: &mut [u8],
    offset: u64,
    path: &LocalPath,
) -> anyhow::Result<usize> {
    let mut done = 0;
    let mut retries = 0;
    while done < buf.len() {
        match file.read_at(&mut buf[done..], offset + done as u64) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) if err.raw_os_error() == Some(libc::EIO) && retries < EIO_RETRIES => {
                retries += 1;
                warn!(
                    "read error on '{}' at offset {}: {}, retrying",
                    path,
                    offset + done as u64,
                    err
                );
                thread::sleep(Duration::from_secs(1));
            }
            Err(err) => {
                return Err(err).with_context(|| format!("read from '{}' failed", path))
            }
        }
    }
    Ok(done)
}
