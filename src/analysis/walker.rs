use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::Result;

/// Lists filesystem children in name order.
pub struct DirectoryLister {
    follow_links: bool,
}

impl DirectoryLister {
    pub fn new() -> Self {
        Self {
            follow_links: false,
        }
    }

    pub fn follow_links(mut self, yes: bool) -> Self {
        self.follow_links = yes;
        self
    }

    /// Regular files and directories directly inside `dir`.
    pub fn children(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut children = Vec::new();
        let walker = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(self.follow_links)
            .sort_by_file_name();

        for entry in walker {
            let entry = entry.map_err(std::io::Error::from)?;
            let file_type = entry.file_type();
            if file_type.is_file() || file_type.is_dir() {
                children.push(entry.into_path());
            } else {
                debug!("Skipping special file {}", entry.path().display());
            }
        }
        Ok(children)
    }

    /// Every regular file below `dir` with its path components relative to
    /// `dir`, in depth-first name order.
    pub fn files_recursive(&self, dir: &Path) -> Result<Vec<(Vec<String>, PathBuf)>> {
        let mut files = Vec::new();
        let walker = WalkDir::new(dir)
            .min_depth(1)
            .follow_links(self.follow_links)
            .sort_by_file_name();

        for entry in walker {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let components = entry
                .path()
                .strip_prefix(dir)
                .unwrap_or(entry.path())
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            files.push((components, entry.into_path()));
        }
        Ok(files)
    }
}

impl Default for DirectoryLister {
    fn default() -> Self {
        Self::new()
    }
}
