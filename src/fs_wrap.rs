/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Thin wrappers around the POSIX calls std does not expose.

use std::alloc::{self, Layout};
use std::ffi::CString;
use std::fs::File;
use std::ops::{Deref, DerefMut};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, IntoRawFd};
use std::path::Path;
use std::{io, ptr::NonNull};

use anyhow::Context;

/// Alignment required for O_DIRECT transfers.
pub const DIRECT_IO_ALIGN: usize = 4096;

/// Capacity and free space of the filesystem backing a path.
#[derive(Debug, Clone, Copy)]
pub struct FsUsage {
    pub size: u64,
    pub free: u64,
}

impl FsUsage {
    pub fn used(&self) -> u64 {
        self.size - self.free
    }
    pub fn used_percent(&self) -> f64 {
        100.0 * self.used() as f64 / self.size as f64
    }
}

pub fn statvfs(path: &Path) -> anyhow::Result<FsUsage> {
    let cpath = CString::new(path.as_os_str().as_bytes())
        .with_context(|| format!("path '{}' contains a NUL byte", path.display()))?;
    let mut vfs: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(cpath.as_ptr(), &mut vfs) };
    if rc != 0 {
        return Err(io::Error::last_os_error())
            .with_context(|| format!("statvfs failed on '{}'", path.display()));
    }
    Ok(FsUsage {
        size: vfs.f_blocks as u64 * vfs.f_frsize as u64,
        free: vfs.f_bavail as u64 * vfs.f_frsize as u64,
    })
}

#[derive(Debug, Clone, Copy)]
pub enum Advice {
    /// Pages will not be needed again; lets later reads hit the disk.
    DontNeed,
    /// Pages will be read once.
    NoReuse,
}

pub fn fadvise(file: &File, advice: Advice) -> io::Result<()> {
    let advice = match advice {
        Advice::DontNeed => libc::POSIX_FADV_DONTNEED,
        Advice::NoReuse => libc::POSIX_FADV_NOREUSE,
    };
    let rc = unsafe { libc::posix_fadvise(file.as_raw_fd(), 0, 0, advice) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

/// Drop O_DIRECT from an open descriptor. Needed before a tail write whose
/// length is not a multiple of [`DIRECT_IO_ALIGN`].
pub fn clear_direct_io(file: &File) -> io::Result<()> {
    let fd = file.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_DIRECT != 0 {
        let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_DIRECT) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Close a descriptor and surface the error, which `Drop` on `File` would
/// swallow. A failed close after a write can mean lost data.
pub fn close(file: File) -> io::Result<()> {
    let fd = file.into_raw_fd();
    if unsafe { libc::close(fd) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Heap buffer aligned for O_DIRECT transfers.
pub struct AlignedBuf {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl AlignedBuf {
    pub fn new(len: usize) -> Self {
        let layout = Layout::from_size_align(len, DIRECT_IO_ALIGN).unwrap();
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            alloc::handle_alloc_error(layout);
        };
        Self { ptr, layout }
    }
}

impl Deref for AlignedBuf {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl DerefMut for AlignedBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_buf_alignment() {
        let buf = AlignedBuf::new(crate::pattern::BUF_SIZE);
        assert_eq!(buf.as_ptr() as usize % DIRECT_IO_ALIGN, 0);
        assert_eq!(buf.len(), crate::pattern::BUF_SIZE);
    }

    #[test]
    fn test_statvfs_tmp() {
        let usage = statvfs(&std::env::temp_dir()).unwrap();
        assert!(usage.size > 0);
        assert!(usage.free <= usage.size);
    }
}
