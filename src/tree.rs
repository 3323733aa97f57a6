/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Directory fan-out allocator. Directories are arena nodes addressed by
//! index; nothing here owns a file, the registry does.

use std::fs;
use std::os::unix::fs::DirBuilderExt;

use anyhow::Context;
use log::info;

use crate::path::LocalPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DirIndex(pub usize);

#[derive(Debug)]
pub struct Dir {
    pub parent: Option<DirIndex>,
    pub name: String,
    pub path: LocalPath,
    /// Files currently resident in this directory
    pub num_files: u16,
}

/// Arena of every directory created during the run, root first. Directories
/// are never destroyed until shutdown, so indices stay valid.
pub struct DirTree {
    dirs: Vec<Dir>,
}

impl DirTree {
    pub const ROOT: DirIndex = DirIndex(0);

    /// Create the working directory on disk. Fails if it already exists.
    pub fn create_root(path: LocalPath) -> anyhow::Result<Self> {
        mkdir(&path).with_context(|| format!("failed to create working dir '{}'", path))?;
        let root = Dir {
            parent: None,
            name: String::new(),
            path,
            // the root counts itself, so it fills one file early
            num_files: 1,
        };
        Ok(Self { dirs: vec![root] })
    }

    /// Grow the tree for `level`: one new subtree under the root whose top
    /// directory is `d{level-1}`. A directory created with ordinal `n`
    /// recursively creates children with ordinals `n-1 .. 0`.
    pub fn grow_level(&mut self, level: u32) -> anyhow::Result<()> {
        debug_assert!(level >= 1);
        self.grow(Self::ROOT, level - 1)?;
        Ok(())
    }

    fn grow(&mut self, parent: DirIndex, num: u32) -> anyhow::Result<DirIndex> {
        let name = format!("d{:02}", num);
        let path = self.dirs[parent.0].path.join(&name);
        info!("Creating dir {}", path);
        mkdir(&path).with_context(|| format!("failed to create dir '{}'", path))?;
        let index = DirIndex(self.dirs.len());
        self.dirs.push(Dir {
            parent: Some(parent),
            name,
            path,
            num_files: 0,
        });
        for child in (0..num).rev() {
            self.grow(index, child)?;
        }
        Ok(index)
    }

    pub fn path(&self, index: DirIndex) -> &LocalPath {
        &self.dirs[index.0].path
    }

    pub fn num_files(&self, index: DirIndex) -> u16 {
        self.dirs[index.0].num_files
    }

    pub fn add_file(&mut self, index: DirIndex) {
        self.dirs[index.0].num_files += 1;
    }

    pub fn remove_file(&mut self, index: DirIndex) {
        self.dirs[index.0].num_files -= 1;
    }

    /// Every directory index, root included.
    pub fn all(&self) -> Vec<DirIndex> {
        (0..self.dirs.len()).map(DirIndex).collect()
    }

    pub fn dirs(&self) -> &[Dir] {
        &self.dirs
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }
}

fn mkdir(path: &LocalPath) -> std::io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.mode(0o700);
    builder.create(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_in_tempdir() -> (tempfile::TempDir, DirTree) {
        let tmp = tempfile::tempdir().unwrap();
        let root = LocalPath::new(&tmp.path().join("root"));
        let tree = DirTree::create_root(root).unwrap();
        (tmp, tree)
    }

    #[test]
    fn test_create_root_twice_fails() {
        let (_tmp, tree) = tree_in_tempdir();
        let path = tree.path(DirTree::ROOT).clone();
        assert!(DirTree::create_root(path).is_err());
    }

    #[test]
    fn test_grow_first_level() {
        let (_tmp, mut tree) = tree_in_tempdir();
        tree.grow_level(1).unwrap();
        assert_eq!(2, tree.len());
        assert_eq!("d00", tree.dirs()[1].name);
        assert!(tree.path(DirIndex(1)).as_ref().is_dir());
    }

    #[test]
    fn test_grow_three_levels() {
        let (_tmp, mut tree) = tree_in_tempdir();
        for level in 1..=3 {
            tree.grow_level(level).unwrap();
        }
        // level subtrees: d00, d01/d00, d02/{d01/d00, d00}
        assert_eq!(8, tree.len());
        let root_children: Vec<&str> = tree
            .dirs()
            .iter()
            .filter(|d| d.parent == Some(DirTree::ROOT))
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(vec!["d00", "d01", "d02"], {
            let mut names = root_children;
            names.sort();
            names
        });
        for dir in tree.dirs() {
            assert!(dir.path.as_ref().is_dir());
        }
    }

    #[test]
    fn test_file_counts() {
        let (_tmp, mut tree) = tree_in_tempdir();
        tree.grow_level(1).unwrap();
        let dir = DirIndex(1);
        assert_eq!(0, tree.num_files(dir));
        tree.add_file(dir);
        tree.add_file(dir);
        assert_eq!(2, tree.num_files(dir));
        tree.remove_file(dir);
        assert_eq!(1, tree.num_files(dir));
        // root starts with its self-slot taken
        assert_eq!(1, tree.num_files(DirTree::ROOT));
    }
}
