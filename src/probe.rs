// src/probe.rs
//
// Decoded-metadata probe (spec.md §4.G): identify an image's type and read
// its width/height/max-value by shelling out to `file` and `pnmfile`.

use crate::error::{Error, Result};
use crate::geometry::ImageType;
use crate::pipeline::{Command, PipelineRunner};
use regex::Regex;
use std::sync::OnceLock;

fn file_type_regexes() -> &'static [(Regex, ImageType)] {
    static CELL: OnceLock<Vec<(Regex, ImageType)>> = OnceLock::new();
    CELL.get_or_init(|| {
        vec![
            (
                Regex::new(r#"Netpbm P[BGPP]M "rawbits" image data$"#).unwrap(),
                ImageType::Ppm,
            ),
            (Regex::new(r"JPEG image data").unwrap(), ImageType::Jpeg),
            (Regex::new(r"PNG image data").unwrap(), ImageType::Png),
            (Regex::new(r"GIF image data").unwrap(), ImageType::Gif),
        ]
    })
}

fn pnmfile_regex() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| {
        Regex::new(r"^stdin:\tP[PGB]M raw, (\d+) by (\d+)(?:[ ]+maxval (\d+))?$").unwrap()
    })
}

/// Run `file -b <path>` and match its stdout against the known-format
/// table, in order; first match wins.
pub fn probe_type(runner: &PipelineRunner, path: &std::path::Path) -> Result<ImageType> {
    let cmd = Command::new("file").arg("-b").arg(path.to_string_lossy().into_owned());
    let stdout = runner
        .run_single(&cmd, &[])
        .map_err(|e| Error::in_function("probe_type", e))?;
    let text = String::from_utf8_lossy(&stdout);
    let text = text.trim();
    for (re, ty) in file_type_regexes() {
        if re.is_match(text) {
            return Ok(*ty);
        }
    }
    Err(Error::caller(format!("not an image: {text}")))
}

/// Cheap in-memory magic-byte sniff, used only to pick the extension
/// symlink at ingestion time (spec.md §4.C's `type_probe: bytes -> T`).
/// The authoritative classification used to build `ImageFile` still comes
/// from `probe_type`, which shells out to `file`.
pub fn sniff_type(bytes: &[u8]) -> Option<ImageType> {
    if bytes.starts_with(&[0xFF, 0xD8]) {
        Some(ImageType::Jpeg)
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some(ImageType::Png)
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some(ImageType::Gif)
    } else if bytes.starts_with(b"P1")
        || bytes.starts_with(b"P2")
        || bytes.starts_with(b"P3")
        || bytes.starts_with(b"P4")
        || bytes.starts_with(b"P5")
        || bytes.starts_with(b"P6")
    {
        Some(ImageType::Ppm)
    } else {
        None
    }
}

pub fn ext_of_sniff(ty: &Option<ImageType>) -> String {
    ty.map(|t| t.extension().to_string()).unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PnmMeta {
    pub width: u32,
    pub height: u32,
    pub max_val: u32,
}

/// Feed `bytes` through `decoder(known_type) | pnmfile` and parse the
/// width/height/maxval out of `pnmfile`'s stdout.
pub fn probe_pnm(runner: &PipelineRunner, bytes: &[u8], known_type: ImageType) -> Result<PnmMeta> {
    let mut cmds = Vec::new();
    if let Some(decoder) = known_type.decoder_to_ppm() {
        cmds.push(Command::new(decoder));
    } else {
        cmds.push(Command::new("cat"));
    }
    cmds.push(Command::new("pnmfile"));

    let outputs = runner
        .run(&cmds, bytes)
        .map_err(|e| Error::in_function("probe_pnm", e))?;
    let stdout = outputs.last().cloned().unwrap_or_default();
    let text = String::from_utf8_lossy(&stdout);
    let text = text.trim_end();

    let caps = pnmfile_regex()
        .captures(text)
        .ok_or_else(|| Error::caller(format!("malformed pnmfile output: {text}")))?;
    let width: u32 = caps[1]
        .parse()
        .map_err(|_| Error::caller("pnmfile width was not a number"))?;
    let height: u32 = caps[2]
        .parse()
        .map_err(|_| Error::caller("pnmfile height was not a number"))?;
    let max_val: u32 = match caps.get(3) {
        Some(m) => m
            .as_str()
            .parse()
            .map_err(|_| Error::caller("pnmfile maxval was not a number"))?,
        None => 1,
    };

    Ok(PnmMeta {
        width,
        height,
        max_val,
    })
}
