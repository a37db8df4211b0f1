use std::ffi::OsStr;
use std::fs::{self, Metadata};
use std::io;
use std::path::Path;

#[cfg(windows)]
use std::os::windows::fs::MetadataExt;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::IndexResult;

/// Why an entry was not indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Index,
    Hidden,
    Excluded,
    Directory,
    Symlink,
    /// Device, FIFO, socket or anything else that is not a regular file.
    Special,
}

/// Live state of a file right before it is hashed.
#[derive(Debug)]
pub enum Recheck {
    Regular(Metadata),
    NotRegular,
    Missing,
    Unreadable(io::Error),
}

/// Decides which filesystem entries belong in the inventory.
///
/// Metadata passed in must come from `symlink_metadata` (or a walker that
/// does not follow links) so that symbolic links are seen as links.
#[derive(Debug, Clone)]
pub struct PathFilter {
    excludes: GlobSet,
    include_hidden: bool,
}

impl Default for PathFilter {
    fn default() -> Self {
        Self { excludes: GlobSet::empty(), include_hidden: false }
    }
}

impl PathFilter {
    pub fn new(excludes: &[String], include_hidden: bool) -> IndexResult<Self> {
        Ok(Self { excludes: build_globset(excludes)?, include_hidden })
    }

    /// Hidden by name alone; platform attributes need metadata.
    pub fn is_hidden(&self, path: &Path) -> bool {
        !self.include_hidden && is_hidden_name(path.file_name())
    }

    pub fn should_index(&self, path: &Path, md: &Metadata) -> bool {
        self.classify(path, md) == Verdict::Index
    }

    pub fn classify(&self, path: &Path, md: &Metadata) -> Verdict {
        if self.is_hidden(path) || (!self.include_hidden && is_hidden_or_system(md)) {
            return Verdict::Hidden;
        }
        let ft = md.file_type();
        if ft.is_dir() {
            return Verdict::Directory;
        }
        if ft.is_symlink() {
            return Verdict::Symlink;
        }
        if !ft.is_file() {
            return Verdict::Special;
        }
        if matches_excludes(path, &self.excludes) {
            return Verdict::Excluded;
        }
        Verdict::Index
    }

    /// Whether the walk should enter a directory.
    pub fn should_descend(&self, path: &Path, md: &Metadata) -> bool {
        if self.is_hidden(path) || (!self.include_hidden && is_hidden_or_system(md)) {
            return false;
        }
        if md.file_type().is_symlink() || is_reparse_point(md) {
            return false;
        }
        !matches_excludes(path, &self.excludes)
    }

    /// Re-checks a path right before its content is read. Never errors: any
    /// surprise is reported as a variant so the caller can skip the file.
    pub fn recheck(path: &Path) -> Recheck {
        match fs::symlink_metadata(path) {
            Ok(md) if md.file_type().is_file() => Recheck::Regular(md),
            Ok(_) => Recheck::NotRegular,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Recheck::Missing,
            Err(e) => Recheck::Unreadable(e),
        }
    }
}

/// Dot-prefixed base names are hidden on every platform.
pub fn is_hidden_name(name: Option<&OsStr>) -> bool {
    name.map(|n| n.to_string_lossy().starts_with('.')).unwrap_or(false)
}

fn build_globset(patterns: &[String]) -> IndexResult<GlobSet> {
    let mut b = GlobSetBuilder::new();
    for p in patterns {
        if p.trim().is_empty() {
            continue;
        }
        // Patterns are matched against '/'-separated paths on every platform.
        let norm = p.trim().replace('\\', "/");
        b.add(Glob::new(&norm)?);
    }
    Ok(b.build()?)
}

fn matches_excludes(path: &Path, set: &GlobSet) -> bool {
    if set.is_empty() {
        return false;
    }
    let s = path.to_string_lossy().replace('\\', "/");
    set.is_match(&s)
}

#[cfg(windows)]
fn is_hidden_or_system(md: &Metadata) -> bool {
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    const FILE_ATTRIBUTE_SYSTEM: u32 = 0x4;
    let attrs = md.file_attributes();
    (attrs & FILE_ATTRIBUTE_HIDDEN) != 0 || (attrs & FILE_ATTRIBUTE_SYSTEM) != 0
}

#[cfg(not(windows))]
fn is_hidden_or_system(_md: &Metadata) -> bool {
    false
}

#[cfg(windows)]
fn is_reparse_point(md: &Metadata) -> bool {
    const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x400;
    (md.file_attributes() & FILE_ATTRIBUTE_REPARSE_POINT) != 0
}

#[cfg(not(windows))]
fn is_reparse_point(_md: &Metadata) -> bool {
    false
}
