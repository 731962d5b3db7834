// src/file_cache.rs
//
// FileCache: checksum-keyed blob store on disk (spec.md §4.C).
//
// Invariant maintained by every public operation: `cache_top/<checksum>` is
// either absent or holds bytes whose MD5 is `<checksum>`.

use crate::error::{Error, Result};
use crate::pipeline::{Command, PipelineRunner};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type Hex32 = String;

/// Provenance of a `File`'s bytes. Never affects the checksum, only the
/// audit trail.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FileSource {
    ThePath(String),
    TheUri(String),
    TheBytes,
    TheCmd(String),
}

/// A byte-cache record. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct File {
    pub source: Option<FileSource>,
    pub checksum: Hex32,
    pub messages: Vec<String>,
    pub ext: String,
}

/// Trait object used by `from_uri`; kept separate from the HTTP client
/// implementation so the core cache has no mandatory network dependency.
pub trait UriFetcher: Send + Sync {
    fn fetch(&self, uri: &str) -> Result<Vec<u8>>;
}

pub struct FileCache {
    cache_top: PathBuf,
    runner: Arc<PipelineRunner>,
}

impl FileCache {
    /// `cache_top` is created lazily on first use, not at construction.
    pub fn new(cache_top: impl Into<PathBuf>, runner: Arc<PipelineRunner>) -> Self {
        FileCache {
            cache_top: cache_top.into(),
            runner,
        }
    }

    pub fn cache_top(&self) -> &Path {
        &self.cache_top
    }

    fn ensure_cache_top(&self) -> Result<()> {
        fs::create_dir_all(&self.cache_top)
            .map_err(|e| Error::in_function("ensure_cache_top", e.into()))
    }

    /// `cache_top/<file.checksum>`. Pure; never touches disk.
    pub fn path_of(&self, file: &File) -> PathBuf {
        self.cache_top.join(&file.checksum)
    }

    fn ext_path_of(&self, checksum: &str, ext: &str) -> PathBuf {
        self.cache_top.join(format!("{checksum}{ext}"))
    }

    /// Ingest raw bytes. `type_probe` classifies the content (used only to
    /// pick the extension symlink); `ext_of` names the extension for that
    /// classification.
    pub fn from_bytes<T>(
        &self,
        bytes: &[u8],
        type_probe: impl FnOnce(&[u8]) -> T,
        ext_of: impl FnOnce(&T) -> String,
    ) -> Result<(File, T)> {
        self.ensure_cache_top()?;
        let checksum = hex_md5(bytes);
        let dest = self.cache_top.join(&checksum);
        if !dest.exists() {
            write_atomic(&dest, bytes)?;
        }
        let probed = type_probe(bytes);
        let ext = ext_of(&probed);
        if !ext.is_empty() {
            self.ensure_ext_symlink(&checksum, &ext)?;
        }
        Ok((
            File {
                source: Some(FileSource::TheBytes),
                checksum,
                messages: Vec::new(),
                ext,
            },
            probed,
        ))
    }

    pub fn from_path<T>(
        &self,
        path: impl AsRef<Path>,
        type_probe: impl FnOnce(&[u8]) -> T,
        ext_of: impl FnOnce(&T) -> String,
    ) -> Result<(File, T)> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .map_err(|e| Error::in_function("from_path", e.into()))?;
        let (mut file, probed) = self.from_bytes(&bytes, type_probe, ext_of)?;
        file.source = Some(FileSource::ThePath(path.to_string_lossy().into_owned()));
        Ok((file, probed))
    }

    pub fn from_uri<T>(
        &self,
        uri: &str,
        fetcher: &dyn UriFetcher,
        type_probe: impl FnOnce(&[u8]) -> T,
        ext_of: impl FnOnce(&T) -> String,
    ) -> Result<(File, T)> {
        let bytes = fetcher
            .fetch(uri)
            .map_err(|e| Error::in_function("from_uri", e))?;
        let (mut file, probed) = self.from_bytes(&bytes, type_probe, ext_of)?;
        file.source = Some(FileSource::TheUri(uri.to_string()));
        Ok((file, probed))
    }

    /// Run `cmd` with empty stdin; ingest its stdout as the blob.
    pub fn from_command<T>(
        &self,
        cmd: &Command,
        type_probe: impl FnOnce(&[u8]) -> T,
        ext_of: impl FnOnce(&T) -> String,
    ) -> Result<(File, T)> {
        let stdout = self.runner.run_single(cmd, &[])?;
        let (mut file, probed) = self.from_bytes(&stdout, type_probe, ext_of)?;
        file.source = Some(FileSource::TheCmd(cmd.display()));
        Ok((file, probed))
    }

    pub fn load(&self, file: &File) -> Result<Vec<u8>> {
        fs::read(self.path_of(file)).map_err(|e| Error::in_function("load", e.into()))
    }

    /// Idempotent: if the extension symlink already exists (even pointing
    /// elsewhere) it is left alone, preserving any extension hint already
    /// on disk.
    fn ensure_ext_symlink(&self, checksum: &str, ext: &str) -> Result<()> {
        let link = self.ext_path_of(checksum, ext);
        if link.symlink_metadata().is_ok() {
            return Ok(());
        }
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(checksum, &link)
                .map_err(|e| Error::in_function("ensure_ext_symlink", e.into()))?;
        }
        #[cfg(not(unix))]
        {
            fs::copy(self.cache_top.join(checksum), &link)
                .map_err(|e| Error::in_function("ensure_ext_symlink", e.into()))?;
        }
        Ok(())
    }
}

fn hex_md5(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| Error::in_function("write_atomic", e.into()))?;
    tmp.write_all(bytes)
        .map_err(|e| Error::in_function("write_atomic", e.into()))?;
    tmp.persist(dest)
        .map_err(|e| Error::in_function("write_atomic", e.error.into()))?;
    Ok(())
}
