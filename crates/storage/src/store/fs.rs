#![forbid(unsafe_code)]

//! Low-level file primitives: atomic JSON documents, JSONL appends, the
//! global advisory lock, and hashed file-lock keys.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

use crate::{CoordError, Result};

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, parts: &[&str]) -> PathBuf {
        let mut p = self.root.clone();
        for part in parts {
            p.push(part);
        }
        p
    }

    pub fn ensure_dir(&self, parts: &[&str]) -> PathBuf {
        let p = self.path(parts);
        let _ = fs::create_dir_all(&p);
        p
    }

    pub fn exists(&self, parts: &[&str]) -> bool {
        self.path(parts).exists()
    }

    /// Indented JSON via tmp-file + rename; a reader never observes a
    /// partial document.
    pub fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let data = serde_json::to_vec_pretty(value)?;
        let tmp = tmp_sibling(path);
        fs::write(&tmp, data)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let data = fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Sorted `*.json` paths directly under `dir`; a missing directory is
    /// an empty listing, not an error.
    pub fn list_json_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Subdirectory names under `dir`, sorted; empty when missing.
    pub fn list_dirs(&self, dir: &Path) -> Result<Vec<String>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn remove(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        Ok(())
    }

    /// Append one JSON line. Appends happen only under the global lock, so
    /// rows never interleave.
    pub fn append_jsonl<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut f = OpenOptions::new().create(true).append(true).open(path)?;
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');
        f.write_all(&line)?;
        Ok(())
    }

    /// Run `f` holding the exclusive advisory lock on `{root}/.global.lock`.
    /// This is the single cross-process mutation guard: two processes on
    /// the same root serialize here, and within a process request threads
    /// serialize on the same file descriptor lock. Callers that block must
    /// not call this around their whole wait; they re-enter per iteration.
    pub fn with_lock<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock_path = self.path(&[".global.lock"]);
        if let Some(dir) = lock_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&lock_path)?;
        file.lock_exclusive().map_err(|err| {
            CoordError::Io(std::io::Error::new(
                err.kind(),
                format!("acquire global lock: {err}"),
            ))
        })?;
        let result = f();
        let _ = FileExt::unlock(&file);
        result
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Key for a file lock document: first 16 hex chars of the SHA-256 of the
/// cleaned path. Hashing sidesteps path-length and case-sensitivity issues
/// with using the path itself as a file name.
pub fn path_hash(file: &str) -> String {
    let digest = Sha256::digest(clean_path(file).as_bytes());
    let mut out = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Lexical path normalization: collapse separators and `.`, resolve `..`
/// against preceding components without touching the filesystem. Two
/// spellings of the same path must hash to the same lock key.
pub fn clean_path(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut stack: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if let Some(last) = stack.last() {
                    if *last != ".." {
                        stack.pop();
                        continue;
                    }
                }
                if !rooted {
                    stack.push("..");
                }
            }
            other => stack.push(other),
        }
    }
    let joined = stack.join("/");
    match (rooted, joined.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_path_normalizes_like_a_lexical_cleaner() {
        assert_eq!(clean_path("a/b/../c"), "a/c");
        assert_eq!(clean_path("./a//b/"), "a/b");
        assert_eq!(clean_path("/a/../../b"), "/b");
        assert_eq!(clean_path("../x"), "../x");
        assert_eq!(clean_path(""), ".");
        assert_eq!(clean_path("/"), "/");
    }

    #[test]
    fn path_hash_is_stable_across_spellings() {
        assert_eq!(path_hash("src/./lib.rs"), path_hash("src/lib.rs"));
        assert_eq!(path_hash("a.go").len(), 16);
        assert_ne!(path_hash("a.go"), path_hash("b.go"));
    }
}
