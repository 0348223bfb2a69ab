use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};

/// Source of task files and submissions, addressed by URI.
pub trait FileStore: Send + Sync {
    fn get(&self, uri: &str) -> Result<Box<dyn FileHandle>>;
}

pub trait FileHandle {
    fn copy_to(&self, local: &Path) -> Result<()>;
    fn copy_from(&self, local: &Path) -> Result<()>;
}

/// Maps `scheme://a/b/c` (or a bare relative path) to `<root>/a/b/c`.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

pub struct LocalFile {
    path: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, uri: &str) -> Result<PathBuf> {
        let rel = match uri.find("://") {
            Some(idx) => &uri[idx + 3..],
            None => uri,
        };

        let mut path = self.root.clone();
        let mut depth = 0;
        for c in Path::new(rel).components() {
            match c {
                Component::Normal(s) => {
                    path.push(s);
                    depth += 1;
                }
                Component::CurDir => {}
                _ => anyhow::bail!("file uri escapes the store: {:?}", uri),
            }
        }
        if depth == 0 {
            anyhow::bail!("empty file uri: {:?}", uri);
        }
        Ok(path)
    }
}

impl FileStore for LocalFileStore {
    fn get(&self, uri: &str) -> Result<Box<dyn FileHandle>> {
        let path = self.resolve(uri)?;
        Ok(Box::new(LocalFile { path }))
    }
}

impl FileHandle for LocalFile {
    fn copy_to(&self, local: &Path) -> Result<()> {
        fs::copy(&self.path, local).with_context(|| {
            format!(
                "failed to fetch file: src = {}, dst = {}",
                self.path.display(),
                local.display()
            )
        })?;
        Ok(())
    }

    fn copy_from(&self, local: &Path) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(local, &self.path).with_context(|| {
            format!(
                "failed to store file: src = {}, dst = {}",
                local.display(),
                self.path.display()
            )
        })?;
        Ok(())
    }
}

/// Last path segment of a URI.
pub fn file_name(uri: &str) -> Result<&str> {
    match uri.rsplit('/').next() {
        Some(name) if !name.is_empty() && name != "." && name != ".." => Ok(name),
        _ => anyhow::bail!("file uri has no file name: {:?}", uri),
    }
}
