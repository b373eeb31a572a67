use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::info;

use crate::error::Result;
use crate::util::path_component;

/// Per-store archive directories under one root.
#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
}

impl BackupStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store_dir(&self, store: &str) -> PathBuf {
        self.root.join(path_component(store))
    }

    /// Create the root and one directory per store name. Existing
    /// directories are left alone.
    pub fn ensure_store_dirs<'a, I>(&self, stores: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        fs::create_dir_all(&self.root)?;
        let mut count = 0;
        for store in stores {
            fs::create_dir_all(self.store_dir(store))?;
            count += 1;
        }
        info!(root = %self.root.display(), stores = count, "backup directories ready");
        Ok(count)
    }

    pub fn archive_store_report(&self, store: &str, date: NaiveDate, html: &str) -> Result<PathBuf> {
        let dir = self.store_dir(store);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.html", date.format("%Y-%m-%d")));
        fs::write(&path, html)?;
        Ok(path)
    }

    pub fn archive(&self, file_name: &str, contents: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)?;
        let path = self.root.join(file_name);
        fs::write(&path, contents)?;
        Ok(path)
    }
}
