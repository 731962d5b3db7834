// src/engine.rs
//
// Derivation engine (spec.md §4.E): recursively evaluates an ImageKey into
// an ImageFile, invoking external pipelines and memoizing through the
// persistent CacheMap. Single-flight (spec.md §5) coalesces concurrent
// in-process callers of the same key onto one build.

use crate::error::{Error, Result};
use crate::exif::OrientationPort;
use crate::file_cache::FileCache;
use crate::geometry::{ImageCrop, ImageType, Rotation};
use crate::key::{ImageFile, ImageKey};
use crate::pipeline::{Command, PipelineRunner};
use crate::probe;
use crate::rational::approx_is_one;
use crate::store::CacheMap;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;

/// Per-key in-process coordination slot: the first caller for a key builds
/// it; later callers for the same key block on `done` until the result is
/// ready, then read it out of `result`.
struct Inflight {
    lock: Mutex<bool>,
    done: Condvar,
    result: Mutex<Option<std::result::Result<ImageFile, Error>>>,
}

impl Inflight {
    fn new() -> Self {
        Inflight {
            lock: Mutex::new(false),
            done: Condvar::new(),
            result: Mutex::new(None),
        }
    }
}

pub struct DerivationEngine<'a> {
    map: &'a CacheMap,
    file_cache: Arc<FileCache>,
    runner: Arc<PipelineRunner>,
    orientation: Arc<dyn OrientationPort>,
    inflight: Mutex<HashMap<ImageKey, Arc<Inflight>>>,
}

impl<'a> DerivationEngine<'a> {
    pub fn new(
        map: &'a CacheMap,
        file_cache: Arc<FileCache>,
        runner: Arc<PipelineRunner>,
        orientation: Arc<dyn OrientationPort>,
    ) -> Self {
        DerivationEngine {
            map,
            file_cache,
            runner,
            orientation,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// `look(key)`; on miss, `build(key)` then `put(key, value)`.
    /// Concurrent callers for the same key coalesce on one `build`.
    pub fn get(&self, key: &ImageKey) -> std::result::Result<ImageFile, Error> {
        if let Some(cached) = self
            .map
            .look(key)
            .unwrap_or_else(|e| { e.log_chain(); None })
        {
            return cached;
        }

        let slot = {
            let mut table = self.inflight.lock();
            if let Some(existing) = table.get(key) {
                Arc::clone(existing)
            } else {
                let fresh = Arc::new(Inflight::new());
                table.insert(key.clone(), Arc::clone(&fresh));
                fresh
            }
        };

        let mut is_builder = slot.lock.lock();
        if !*is_builder {
            *is_builder = true;
            drop(is_builder);

            // Re-check the persistent map: another process may have
            // written this key between our first look() and now.
            let value = match self.map.look(key) {
                Ok(Some(cached)) => cached,
                _ => {
                    let built = self.build(key);
                    if let Err(e) = self.map.put(key, built.clone()) {
                        e.log_chain();
                    }
                    built
                }
            };

            *slot.result.lock() = Some(value.clone());
            self.inflight.lock().remove(key);
            slot.done.notify_all();
            value
        } else {
            // Someone else is building; wait for them.
            let mut result = slot.result.lock();
            while result.is_none() {
                slot.done.wait(&mut result);
            }
            result.clone().expect("result set before notify_all")
        }
    }

    fn build(&self, key: &ImageKey) -> std::result::Result<ImageFile, Error> {
        let out = match key {
            ImageKey::Original(img) => Ok(img.clone()),
            ImageKey::Upright(inner) => self.build_upright(inner),
            ImageKey::Scaled(size, dpi, inner) => self.build_scaled(size, *dpi, inner),
            ImageKey::Cropped(crop, inner) => self.build_cropped(crop, inner),
        };
        out.map_err(|e| Error::in_function("DerivationEngine::build", e))
    }

    fn build_upright(&self, inner: &ImageKey) -> Result<ImageFile> {
        let inner_img = self.get(inner)?;
        let bytes = self.file_cache.load(&inner_img.file)?;
        match self.orientation.normalize(&bytes)? {
            None => Ok(inner_img),
            Some(normalized) => self.ingest(&normalized),
        }
    }

    fn build_scaled(
        &self,
        size: &crate::geometry::ImageSize,
        dpi: num_rational::Rational64,
        inner: &ImageKey,
    ) -> Result<ImageFile> {
        let inner_img = self.get(inner)?;
        let scale = crate::geometry::scale_from_dpi(dpi, size, inner_img.width, inner_img.height);
        if approx_is_one(crate::rational::approx(scale)) {
            return Ok(inner_img);
        }

        let bytes = self.file_cache.load(&inner_img.file)?;
        let mut cmds = decode_stage(inner_img.image_type);
        cmds.push(Command::new("pnmscale").arg(format!("{scale:.6}")));
        cmds.push(Command::new("cjpeg"));

        let outputs = self.runner.run(&cmds, &bytes)?;
        let output_bytes = outputs.last().cloned().unwrap_or_default();
        self.ingest(&output_bytes)
    }

    fn build_cropped(&self, crop: &ImageCrop, inner: &ImageKey) -> Result<ImageFile> {
        let inner_img = self.get(inner)?;
        if crop.is_identity() {
            return Ok(inner_img);
        }

        let stages = crop_pipeline_stages(crop, inner_img.image_type, inner_img.width, inner_img.height)?;
        if stages.is_empty() {
            return Ok(inner_img);
        }

        let bytes = self.file_cache.load(&inner_img.file)?;
        let outputs = self.runner.run(&stages, &bytes)?;
        let output_bytes = outputs.last().cloned().unwrap_or_default();
        self.ingest(&output_bytes)
    }

    /// Ingest freshly produced bytes through the byte cache, then probe
    /// metadata to build the final `ImageFile`.
    fn ingest(&self, bytes: &[u8]) -> Result<ImageFile> {
        let (file, _) = self.file_cache.from_bytes(
            bytes,
            probe::sniff_type,
            probe::ext_of_sniff,
        )?;
        let path = self.file_cache.path_of(&file);
        let image_type = probe::probe_type(&self.runner, &path)?;
        let meta = probe::probe_pnm(&self.runner, bytes, image_type)?;
        Ok(ImageFile {
            file,
            image_type,
            width: meta.width,
            height: meta.height,
            max_val: meta.max_val,
        })
    }
}

/// PPM->PPM `pnmcut`/`jpegtran -rotate` pipeline for a crop, inserting
/// conversion stages per spec.md §4.E's table so every stage's "in" type
/// matches the previous stage's "out" type. Output is always JPEG.
fn crop_pipeline_stages(
    crop: &ImageCrop,
    input_type: ImageType,
    width: u32,
    height: u32,
) -> Result<Vec<Command>> {
    let mut stages: Vec<(ImageType, ImageType, Command)> = Vec::new();

    if crop.has_cut() {
        let right = width.saturating_sub(crop.right).saturating_sub(1);
        let bottom = height.saturating_sub(crop.bottom).saturating_sub(1);
        let cmd = Command::new("pnmcut")
            .arg("-left")
            .arg(crop.left.to_string())
            .arg("-right")
            .arg(right.to_string())
            .arg("-top")
            .arg(crop.top.to_string())
            .arg("-bottom")
            .arg(bottom.to_string());
        stages.push((ImageType::Ppm, ImageType::Ppm, cmd));
    }

    if crop.rotation != Rotation::R0 {
        let cmd = Command::new("jpegtran")
            .arg("-rotate")
            .arg(crop.rotation.degrees().to_string());
        stages.push((ImageType::Jpeg, ImageType::Jpeg, cmd));
    }

    build_pipeline_with_conversions(input_type, ImageType::Jpeg, stages)
}

/// Decode `from` to PPM if it isn't already PPM, else an empty prefix
/// (`cat` pass-through handled by the caller never needing it, since an
/// empty Vec means "use bytes unchanged").
fn decode_stage(from: ImageType) -> Vec<Command> {
    match from.decoder_to_ppm() {
        Some(decoder) => vec![Command::new(decoder)],
        None => Vec::new(),
    }
}

fn convert_stage(from: ImageType, to: ImageType) -> Result<Vec<Command>> {
    if from == to {
        return Ok(Vec::new());
    }
    if from == ImageType::Ppm {
        let encoder = to
            .encoder_from_ppm()
            .ok_or_else(|| Error::caller(format!("no PPM encoder for {to:?}")))?;
        return Ok(vec![Command::new(encoder)]);
    }
    if to == ImageType::Ppm {
        let decoder = from
            .decoder_to_ppm()
            .ok_or_else(|| Error::caller(format!("no PPM decoder for {from:?}")))?;
        return Ok(vec![Command::new(decoder)]);
    }
    // X -> Y, neither PPM: go via PPM.
    let mut cmds = convert_stage(from, ImageType::Ppm)?;
    cmds.extend(convert_stage(ImageType::Ppm, to)?);
    Ok(cmds)
}

/// Walk `stages` inserting a conversion before any stage whose declared
/// input type doesn't match the current running type, then a final
/// conversion to `target` if the last stage doesn't already end there.
fn build_pipeline_with_conversions(
    start: ImageType,
    target: ImageType,
    stages: Vec<(ImageType, ImageType, Command)>,
) -> Result<Vec<Command>> {
    let mut pipeline = Vec::new();
    let mut current = start;

    for (stage_in, stage_out, cmd) in stages {
        if current != stage_in {
            pipeline.extend(convert_stage(current, stage_in)?);
        }
        pipeline.push(cmd);
        current = stage_out;
    }

    if current != target {
        pipeline.extend(convert_stage(current, target)?);
    }

    Ok(pipeline)
}
