// lib.rs
//
// pixel-ledger: a content-addressed cache for image files and their
// on-demand derivations (resized, cropped, uprighted).

pub mod engine;
pub mod error;
pub mod exif;
pub mod fetch;
pub mod file_cache;
pub mod geometry;
pub mod key;
pub mod pipeline;
pub mod probe;
pub mod rational;
pub mod store;

use std::sync::Arc;

pub use engine::DerivationEngine;
pub use error::{Error, Result};
pub use exif::{JpegtranOrientationPort, OrientationPort};
pub use fetch::ReqwestFetcher;
pub use file_cache::{File, FileCache, FileSource, UriFetcher};
pub use geometry::{ImageCrop, ImageSize, ImageType, Rotation, SizeDim, Units};
pub use key::{ImageFile, ImageKey};
pub use pipeline::{Command, PipelineRunner};
pub use store::{with_cache, CacheMap};

/// Everything `get`/`build` needs: the byte cache, the subprocess runner,
/// and the orientation port. Opened once and handed to `with_cache`'s body
/// alongside the `CacheMap` it produces.
///
/// ```no_run
/// use pixel_ledger::{with_cache, Cache, DerivationEngine};
///
/// let cache = Cache::open("/var/cache/pixel-ledger/files").unwrap();
/// with_cache("/var/cache/pixel-ledger/index", |map| {
///     let engine = cache.engine(map);
///     // engine.get(&key)
/// }).unwrap();
/// ```
pub struct Cache {
    file_cache: Arc<FileCache>,
    runner: Arc<PipelineRunner>,
    orientation: Arc<dyn OrientationPort>,
}

impl Cache {
    /// `files_dir` backs the checksum-keyed blob store; the transactional
    /// index lives wherever the caller later passes to [`with_cache`].
    pub fn open(files_dir: impl Into<std::path::PathBuf>) -> Result<Self> {
        let runner = Arc::new(PipelineRunner::new());
        let file_cache = Arc::new(FileCache::new(files_dir, Arc::clone(&runner)));
        let orientation = Arc::new(JpegtranOrientationPort::new(Arc::clone(&runner)));
        Ok(Cache {
            file_cache,
            runner,
            orientation,
        })
    }

    pub fn file_cache(&self) -> &Arc<FileCache> {
        &self.file_cache
    }

    pub fn runner(&self) -> &Arc<PipelineRunner> {
        &self.runner
    }

    /// Bind this cache's collaborators to a freshly opened `CacheMap`,
    /// producing the engine that actually resolves `ImageKey`s.
    pub fn engine<'a>(&self, map: &'a CacheMap) -> DerivationEngine<'a> {
        DerivationEngine::new(
            map,
            Arc::clone(&self.file_cache),
            Arc::clone(&self.runner),
            Arc::clone(&self.orientation),
        )
    }

    pub fn fetcher(&self) -> Result<ReqwestFetcher> {
        ReqwestFetcher::new()
    }
}
