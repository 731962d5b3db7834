// src/exif.rs
//
// EXIF orientation port (SPEC_FULL.md §4.H). spec.md treats the normalizer
// as an assumed external collaborator -- a pure function from bytes to
// Ok(Option<bytes>) | Err(kind). This module supplies the default
// implementation: read the Orientation tag with `kamadak-exif`, and when
// it is not already upright, re-encode through `jpegtran` via the
// pipeline runner rather than decoding pixels in-process.

use crate::error::{Error, Result};
use crate::pipeline::{Command, PipelineRunner};
use std::io::Cursor;

/// A pure function from input bytes to "no change needed" (`Ok(None)`) or
/// normalized bytes (`Ok(Some(bytes))`), or a decode failure.
pub trait OrientationPort: Send + Sync {
    fn normalize(&self, bytes: &[u8]) -> Result<Option<Vec<u8>>>;
}

pub struct JpegtranOrientationPort {
    runner: std::sync::Arc<PipelineRunner>,
}

impl JpegtranOrientationPort {
    pub fn new(runner: std::sync::Arc<PipelineRunner>) -> Self {
        JpegtranOrientationPort { runner }
    }
}

impl OrientationPort for JpegtranOrientationPort {
    fn normalize(&self, bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        let orientation = read_orientation(bytes)?;
        let Some(transform) = jpegtran_transform(orientation) else {
            return Ok(None);
        };
        let cmd = Command::new("jpegtran").args(transform.into_iter().map(str::to_string));
        let normalized = self
            .runner
            .run_single(&cmd, bytes)
            .map_err(|e| Error::in_function("JpegtranOrientationPort::normalize", e))?;
        Ok(Some(normalized))
    }
}

/// Reads the EXIF `Orientation` tag (1 = already upright, absent = treated
/// as already upright since there is nothing to normalize).
fn read_orientation(bytes: &[u8]) -> Result<u32> {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(reader) => reader,
        // No EXIF segment at all (e.g. a PNG/GIF/bare PPM) -- nothing to
        // normalize.
        Err(_) => return Ok(1),
    };
    let field = reader.get_field(exif::Tag::Orientation, exif::In::PRIMARY);
    let value = field
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1);
    Ok(value)
}

/// Maps an EXIF orientation value to the `jpegtran` arguments that undo it,
/// or `None` if the value is already upright (1) or unrecognized.
fn jpegtran_transform(orientation: u32) -> Option<Vec<&'static str>> {
    match orientation {
        1 => None,
        2 => Some(vec!["-flip", "horizontal"]),
        3 => Some(vec!["-rotate", "180"]),
        4 => Some(vec!["-flip", "vertical"]),
        5 => Some(vec!["-transpose"]),
        6 => Some(vec!["-rotate", "90"]),
        7 => Some(vec!["-transverse"]),
        8 => Some(vec!["-rotate", "270"]),
        _ => None,
    }
}
