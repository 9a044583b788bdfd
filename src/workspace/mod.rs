//! Workspace-scoped file access.
//!
//! Every operation takes a relative or absolute path, resolves it against
//! the workspace root and refuses to touch anything that does not end up
//! at or beneath that root.  Directory listings and searches additionally
//! honour the workspace's `.gitignore`.

use std::fs;
use std::path::{Component, Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use serde::Serialize;
use tracing::{debug, warn};

use crate::tools::ToolError;

/// Metadata for a single directory entry, relative to the workspace root.
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    /// Workspace-relative path (forward slashes).
    pub path: String,
    pub size: u64,
    pub modified: Option<chrono::DateTime<chrono::Utc>>,
    pub is_dir: bool,
    pub is_file: bool,
}

/// A directory boundary that all file and command operations are confined to.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    ignore: Option<Gitignore>,
}

impl Workspace {
    /// Open `root` as a workspace.  The directory must already exist; its
    /// canonical form becomes the containment boundary.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, ToolError> {
        let given = root.as_ref();
        let root = given
            .canonicalize()
            .map_err(|e| ToolError::io(given, e))?;
        if !root.is_dir() {
            return Err(ToolError::NotADirectory { path: root });
        }
        let ignore = load_ignore(&root);
        debug!(root = %root.display(), gitignore = ignore.is_some(), "workspace opened");
        Ok(Self { root, ignore })
    }

    /// Canonical workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `raw` against the root, following symlinks in the existing
    /// part of the path, and check containment.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let lexical = normalize_lexically(&self.candidate(raw));
        let resolved = canon_or_resolve(&lexical).map_err(|_| self.escape(&lexical))?;
        self.ensure_contained(resolved)
    }

    /// Like [`resolve`](Self::resolve) but does not follow a symlink in the
    /// final component, so `delete`/`move` act on the link itself.
    fn resolve_entry(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let lexical = normalize_lexically(&self.candidate(raw));
        let (Some(parent), Some(name)) = (lexical.parent(), lexical.file_name()) else {
            return self.resolve(raw);
        };
        let parent = canon_or_resolve(parent).map_err(|_| self.escape(&lexical))?;
        self.ensure_contained(parent.join(name))
    }

    fn candidate(&self, raw: &str) -> PathBuf {
        let p = Path::new(raw);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }

    fn ensure_contained(&self, resolved: PathBuf) -> Result<PathBuf, ToolError> {
        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(self.escape(&resolved))
        }
    }

    fn escape(&self, path: &Path) -> ToolError {
        ToolError::PathEscape {
            path: path.to_path_buf(),
            root: self.root.clone(),
        }
    }

    /// Render `path` relative to the root with forward slashes.
    pub fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        let s = rel.to_string_lossy().replace('\\', "/");
        if s.is_empty() {
            ".".to_string()
        } else {
            s
        }
    }

    /// Whether `path` (absolute, under the root) matches the ignore file.
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        let Some(gi) = &self.ignore else {
            return false;
        };
        match path.strip_prefix(&self.root) {
            Ok(rel) if !rel.as_os_str().is_empty() => {
                gi.matched_path_or_any_parents(rel, is_dir).is_ignore()
            }
            _ => false,
        }
    }

    // -- read / write --------------------------------------------------------

    /// Read a text file, falling back to UTF-16 (with BOM) and Latin-1 when
    /// the content is not valid UTF-8.
    pub fn read(&self, raw: &str) -> Result<String, ToolError> {
        let path = self.resolve(raw)?;
        let meta = fs::metadata(&path).map_err(|e| ToolError::io(&path, e))?;
        if !meta.is_file() {
            return Err(ToolError::NotAFile { path });
        }
        let bytes = fs::read(&path).map_err(|e| ToolError::io(&path, e))?;
        decode_text(bytes).ok_or(ToolError::DecodeError { path })
    }

    /// Write `content` to `raw`, creating parent directories as needed.
    ///
    /// The data goes to a hidden sibling first and is renamed into place,
    /// so a failed write never leaves a truncated target behind.
    pub fn write(&self, raw: &str, content: &str) -> Result<PathBuf, ToolError> {
        let path = self.resolve(raw)?;
        if path.is_dir() {
            return Err(ToolError::NotAFile { path });
        }
        let write_err = |source| ToolError::WriteError {
            path: path.clone(),
            source,
        };
        let parent = path
            .parent()
            .ok_or_else(|| ToolError::InvalidArgument(format!("no parent directory for {raw}")))?;
        fs::create_dir_all(parent).map_err(write_err)?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let tmp = parent.join(format!(
            ".{file_name}.{}.tmp",
            uuid::Uuid::new_v4().simple()
        ));
        if let Err(e) = fs::write(&tmp, content) {
            let _ = fs::remove_file(&tmp);
            return Err(write_err(e));
        }
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(write_err(e));
        }
        debug!(path = %path.display(), bytes = content.len(), "file written");
        Ok(path)
    }

    /// Create a directory (and parents) inside the workspace.
    pub fn create_dir(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let path = self.resolve(raw)?;
        fs::create_dir_all(&path).map_err(|source| ToolError::WriteError {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    // -- listing / search ----------------------------------------------------

    /// List a directory: directories first, then case-insensitive path order.
    /// Dotfiles are skipped unless `include_hidden`; ignored entries always are.
    pub fn list(&self, raw: &str, include_hidden: bool) -> Result<Vec<FileInfo>, ToolError> {
        let dir = self.resolve(raw)?;
        let meta = fs::metadata(&dir).map_err(|e| ToolError::io(&dir, e))?;
        if !meta.is_dir() {
            return Err(ToolError::NotADirectory { path: dir });
        }

        let rd = fs::read_dir(&dir).map_err(|e| ToolError::io(&dir, e))?;
        let mut entries = Vec::new();
        for entry in rd.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if !include_hidden && name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            let meta = match fs::metadata(&path).or_else(|_| fs::symlink_metadata(&path)) {
                Ok(m) => m,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if self.is_ignored(&path, meta.is_dir()) {
                continue;
            }
            entries.push(self.info_from_meta(&path, &meta));
        }

        entries.sort_by(|a, b| {
            b.is_dir
                .cmp(&a.is_dir)
                .then_with(|| a.path.to_lowercase().cmp(&b.path.to_lowercase()))
        });
        Ok(entries)
    }

    /// Recursively find files under `dir` whose path matches `pattern`
    /// (glob syntax, matched at any depth).  A missing directory yields an
    /// empty list.
    pub fn find(
        &self,
        pattern: &str,
        dir: &str,
        max_results: usize,
    ) -> Result<Vec<String>, ToolError> {
        if pattern.trim().is_empty() {
            return Err(ToolError::InvalidArgument("pattern must not be empty".into()));
        }
        let base = self.resolve(dir)?;
        if !base.is_dir() {
            return Ok(Vec::new());
        }

        let sep = std::path::MAIN_SEPARATOR;
        let full = format!(
            "{}{sep}**{sep}{}",
            glob::Pattern::escape(&base.to_string_lossy()),
            pattern.trim_start_matches(['/', '\\'])
        );
        let options = glob::MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        let paths = glob::glob_with(&full, options)
            .map_err(|e| ToolError::InvalidArgument(format!("invalid pattern '{pattern}': {e}")))?;

        let mut matches = Vec::new();
        for path in paths.filter_map(Result::ok) {
            if matches.len() >= max_results {
                break;
            }
            if !path.is_file() {
                continue;
            }
            match path.canonicalize() {
                Ok(canon) if canon.starts_with(&self.root) => {}
                _ => continue,
            }
            if self.is_ignored(&path, false) {
                continue;
            }
            matches.push(self.relative(&path));
        }
        debug!(pattern, count = matches.len(), "find completed");
        Ok(matches)
    }

    /// Metadata for a single path.
    pub fn file_info(&self, raw: &str) -> Result<FileInfo, ToolError> {
        let path = self.resolve(raw)?;
        let meta = fs::metadata(&path).map_err(|e| ToolError::io(&path, e))?;
        Ok(self.info_from_meta(&path, &meta))
    }

    fn info_from_meta(&self, path: &Path, meta: &fs::Metadata) -> FileInfo {
        FileInfo {
            path: self.relative(path),
            size: meta.len(),
            modified: meta.modified().ok().map(chrono::DateTime::<chrono::Utc>::from),
            is_dir: meta.is_dir(),
            is_file: meta.is_file(),
        }
    }

    // -- move / copy / delete ------------------------------------------------

    /// Move a file or directory.
    pub fn move_path(&self, src: &str, dst: &str) -> Result<PathBuf, ToolError> {
        let from = self.resolve_entry(src)?;
        let to = self.resolve(dst)?;
        fs::symlink_metadata(&from).map_err(|e| ToolError::io(&from, e))?;
        if from == self.root {
            return Err(ToolError::InvalidArgument("cannot move the workspace root".into()));
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(|e| ToolError::io(parent, e))?;
        }
        if fs::rename(&from, &to).is_err() {
            // rename fails across filesystems; fall back to copy + delete.
            self.copy_resolved(&from, &to)?;
            remove_resolved(&from)?;
        }
        debug!(from = %from.display(), to = %to.display(), "moved");
        Ok(to)
    }

    /// Copy a file or a whole directory tree.
    pub fn copy(&self, src: &str, dst: &str) -> Result<PathBuf, ToolError> {
        let from = self.resolve(src)?;
        let to = self.resolve(dst)?;
        fs::metadata(&from).map_err(|e| ToolError::io(&from, e))?;
        self.copy_resolved(&from, &to)?;
        Ok(to)
    }

    fn copy_resolved(&self, from: &Path, to: &Path) -> Result<(), ToolError> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(|e| ToolError::io(parent, e))?;
        }
        if from.is_file() {
            fs::copy(from, to).map_err(|e| ToolError::io(from, e))?;
            return Ok(());
        }
        if to.starts_with(from) {
            return Err(ToolError::InvalidArgument(format!(
                "cannot copy {} into itself",
                self.relative(from)
            )));
        }
        for entry in walkdir::WalkDir::new(from).follow_links(false) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(from).to_path_buf();
                ToolError::io(path, e.into())
            })?;
            let rel = entry.path().strip_prefix(from).unwrap_or(entry.path());
            let target = to.join(rel);
            let ft = entry.file_type();
            if ft.is_dir() {
                fs::create_dir_all(&target).map_err(|e| ToolError::io(&target, e))?;
            } else if ft.is_symlink() {
                match entry.path().canonicalize() {
                    Ok(real) if real.starts_with(&self.root) && real.is_file() => {
                        fs::copy(&real, &target).map_err(|e| ToolError::io(&target, e))?;
                    }
                    _ => warn!(path = %entry.path().display(), "skipping symlink that leaves the workspace"),
                }
            } else {
                fs::copy(entry.path(), &target).map_err(|e| ToolError::io(&target, e))?;
            }
        }
        Ok(())
    }

    /// Delete a file, or recursively delete a directory.
    pub fn delete(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let path = self.resolve_entry(raw)?;
        if path == self.root {
            return Err(ToolError::InvalidArgument(
                "refusing to delete the workspace root".into(),
            ));
        }
        remove_resolved(&path)?;
        debug!(path = %path.display(), "deleted");
        Ok(path)
    }
}

fn remove_resolved(path: &Path) -> Result<(), ToolError> {
    let meta = fs::symlink_metadata(path).map_err(|e| ToolError::io(path, e))?;
    if meta.is_dir() {
        fs::remove_dir_all(path).map_err(|e| ToolError::io(path, e))
    } else {
        fs::remove_file(path).map_err(|e| ToolError::io(path, e))
    }
}

fn load_ignore(root: &Path) -> Option<Gitignore> {
    let file = root.join(".gitignore");
    if !file.is_file() {
        return None;
    }
    let mut builder = GitignoreBuilder::new(root);
    if let Some(err) = builder.add(&file) {
        warn!(error = %err, "some .gitignore lines could not be parsed");
    }
    match builder.build() {
        Ok(gi) if !gi.is_empty() => Some(gi),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "ignoring unreadable .gitignore");
            None
        }
    }
}

/// Collapse `.` and `..` components without touching the filesystem.
/// `..` at the root stays at the root.
pub(crate) fn normalize_lexically(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in p.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Best-effort canonicalize: if the full path doesn't exist yet,
/// canonicalize the longest existing prefix and append the rest.
pub(crate) fn canon_or_resolve(p: &Path) -> std::io::Result<PathBuf> {
    if fs::symlink_metadata(p).is_ok() {
        return p.canonicalize();
    }
    let mut existing = p.to_path_buf();
    let mut tail = Vec::new();
    while fs::symlink_metadata(&existing).is_err() {
        let name = existing.file_name().map(|f| f.to_os_string()).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("cannot resolve path: {}", p.display()),
            )
        })?;
        tail.push(name);
        existing = existing
            .parent()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("cannot resolve path: {}", p.display()),
                )
            })?
            .to_path_buf();
    }
    let mut resolved = existing.canonicalize()?;
    for component in tail.into_iter().rev() {
        resolved.push(component);
    }
    Ok(resolved)
}

/// Decode file bytes: UTF-8, then UTF-16 when a BOM is present, then
/// Latin-1 for anything without NUL bytes.
pub(crate) fn decode_text(bytes: Vec<u8>) -> Option<String> {
    match String::from_utf8(bytes) {
        Ok(s) => Some(s),
        Err(e) => {
            let bytes = e.into_bytes();
            decode_utf16(&bytes).or_else(|| decode_latin1(&bytes))
        }
    }
}

fn decode_utf16(bytes: &[u8]) -> Option<String> {
    let (little_endian, body) = match bytes {
        [0xFF, 0xFE, rest @ ..] => (true, rest),
        [0xFE, 0xFF, rest @ ..] => (false, rest),
        _ => return None,
    };
    if body.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|c| {
            if little_endian {
                u16::from_le_bytes([c[0], c[1]])
            } else {
                u16::from_be_bytes([c[0], c[1]])
            }
        })
        .collect();
    String::from_utf16(&units).ok()
}

fn decode_latin1(bytes: &[u8]) -> Option<String> {
    if bytes.contains(&0) {
        return None;
    }
    Some(bytes.iter().map(|&b| b as char).collect())
}
