use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{MirrorError, MirrorResult};
use crate::path::MirrorPath;
use crate::recorder::{Recorder, WriteOutcome};

/// File holding an object's own content inside its directory.
pub const CONTENT_FILE: &str = "__content__";

/// Recorder that maps every mirrored object to a directory below `root`,
/// with the object's content in a [`CONTENT_FILE`] inside it.
///
/// Content is replaced atomically through a temporary file in the same
/// directory; identical content is left untouched.
#[derive(Debug, Clone)]
pub struct FsRecorder {
    root: PathBuf,
}

impl FsRecorder {
    /// Create a recorder rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> MirrorResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| MirrorError::persist("create", root.display(), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory backing `path`.
    pub fn dir_for(&self, path: &MirrorPath) -> MirrorResult<PathBuf> {
        let mut dir = self.root.clone();
        for component in path.components() {
            if component.is_empty()
                || component == "."
                || component == ".."
                || component == CONTENT_FILE
                || component.contains(['/', '\0'])
            {
                return Err(MirrorError::InvalidComponent(component.clone()));
            }
            dir.push(component);
        }
        Ok(dir)
    }

    /// Persisted content of `path`, if any.
    pub fn read(&self, path: &MirrorPath) -> MirrorResult<Option<Vec<u8>>> {
        let file = self.dir_for(path)?.join(CONTENT_FILE);
        match fs::read(&file) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MirrorError::persist("read", file.display(), e)),
        }
    }
}

impl Recorder for FsRecorder {
    fn write(&self, path: &MirrorPath, content: &[u8]) -> MirrorResult<WriteOutcome> {
        if self.read(path)?.as_deref() == Some(content) {
            return Ok(WriteOutcome::Unchanged);
        }
        let dir = self.dir_for(path)?;
        fs::create_dir_all(&dir).map_err(|e| MirrorError::persist("create", dir.display(), e))?;

        let file = dir.join(CONTENT_FILE);
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|e| MirrorError::persist("write", file.display(), e))?;
        tmp.write_all(content)
            .map_err(|e| MirrorError::persist("write", file.display(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| MirrorError::persist("sync", file.display(), e))?;
        tmp.persist(&file)
            .map_err(|e| MirrorError::persist("write", file.display(), e.error))?;
        Ok(WriteOutcome::Written)
    }

    fn remove_tree(&self, path: &MirrorPath) -> MirrorResult<()> {
        let dir = self.dir_for(path)?;
        if path.is_root() {
            // the root directory itself stays; only its entries go
            for name in self.list_children(path)? {
                self.remove_tree(&path.child(&name))?;
            }
            return match fs::remove_file(dir.join(CONTENT_FILE)) {
                Err(e) if e.kind() != ErrorKind::NotFound => {
                    Err(MirrorError::persist("remove", dir.display(), e))
                }
                _ => Ok(()),
            };
        }
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MirrorError::persist("remove", dir.display(), e)),
        }
    }

    fn rename(&self, from: &MirrorPath, to: &MirrorPath) -> MirrorResult<()> {
        let src = self.dir_for(from)?;
        let dst = self.dir_for(to)?;
        if !src.exists() {
            // already moved, or never persisted
            tracing::debug!(from = %from, to = %to, "rename source missing");
            return Ok(());
        }
        if dst.exists() {
            tracing::warn!(path = %to, "replacing stale directory");
            fs::remove_dir_all(&dst).map_err(|e| MirrorError::persist("remove", dst.display(), e))?;
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|e| MirrorError::persist("create", parent.display(), e))?;
        }
        fs::rename(&src, &dst).map_err(|e| MirrorError::persist("rename", src.display(), e))
    }

    fn list_children(&self, path: &MirrorPath) -> MirrorResult<Vec<String>> {
        let dir = self.dir_for(path)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MirrorError::persist("list", dir.display(), e)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| MirrorError::persist("list", dir.display(), e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| MirrorError::persist("list", dir.display(), e))?;
            if !file_type.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => tracing::warn!(name = ?raw, dir = %dir.display(), "skipping non UTF-8 entry"),
            }
        }
        names.sort();
        Ok(names)
    }
}
