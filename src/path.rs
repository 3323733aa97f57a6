/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::{fmt::Display, path::Path};

/// Prefix for the per-run working directory
const TEST_DIR_PREFIX: &str = "fstest";

/// Path under (or at) the test root. Cheap to clone, printable in diagnostics.
#[derive(Clone, Debug)]
pub struct LocalPath {
    pub base: Box<Path>,
}

impl LocalPath {
    pub fn new(path: &Path) -> Self {
        Self {
            base: path.to_path_buf().into_boxed_path(),
        }
    }
    /// Per-run working directory: `<parent>/fstest.<pid>`
    pub fn test_root(parent: &Path, pid: u32) -> Self {
        let base = parent
            .join(format!("{}.{}", TEST_DIR_PREFIX, pid))
            .into_boxed_path();
        Self { base }
    }
    pub fn join<P: AsRef<Path>>(&self, path: P) -> Self {
        Self {
            base: self.base.join(path).into_boxed_path(),
        }
    }
}

impl Display for LocalPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.base.display())
    }
}

impl AsRef<Path> for LocalPath {
    fn as_ref(&self) -> &Path {
        self.base.as_ref()
    }
}
