// src/geometry.rs
//
// ImageType, ImageCrop, ImageSize, and the size/DPI arithmetic that decides
// whether a Scaled derivation is a no-op.

use crate::rational::{approx, to_f64};
use num_rational::Rational64;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ImageType {
    Ppm,
    Jpeg,
    Gif,
    Png,
}

impl ImageType {
    pub fn extension(self) -> &'static str {
        match self {
            ImageType::Ppm => ".ppm",
            ImageType::Jpeg => ".jpg",
            ImageType::Gif => ".gif",
            ImageType::Png => ".png",
        }
    }

    /// The external decoder that converts this format's stdin to PPM on
    /// stdout, or `None` for PPM itself (pass-through / `cat`).
    pub fn decoder_to_ppm(self) -> Option<&'static str> {
        match self {
            ImageType::Ppm => None,
            ImageType::Jpeg => Some("jpegtopnm"),
            ImageType::Gif => Some("giftopnm"),
            ImageType::Png => Some("pngtopnm"),
        }
    }

    /// The external encoder that converts PPM stdin to this format on
    /// stdout, or `None` for PPM itself.
    pub fn encoder_from_ppm(self) -> Option<&'static str> {
        match self {
            ImageType::Ppm => None,
            ImageType::Jpeg => Some("cjpeg"),
            ImageType::Gif => Some("ppmtogif"),
            ImageType::Png => Some("pnmtopng"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImageCrop {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
    pub rotation: Rotation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rotation {
    R0,
    R90,
    R180,
    R270,
}

impl Rotation {
    pub fn degrees(self) -> u32 {
        match self {
            Rotation::R0 => 0,
            Rotation::R90 => 90,
            Rotation::R180 => 180,
            Rotation::R270 => 270,
        }
    }

    pub fn from_degrees(deg: u32) -> crate::error::Result<Self> {
        match deg % 360 {
            0 => Ok(Rotation::R0),
            90 => Ok(Rotation::R90),
            180 => Ok(Rotation::R180),
            270 => Ok(Rotation::R270),
            other => Err(crate::error::Error::caller(format!(
                "rotation must be one of 0, 90, 180, 270 degrees, got {other}"
            ))),
        }
    }

    /// The rotation that, composed with this one, yields the identity.
    pub fn inverse(self) -> Rotation {
        match self {
            Rotation::R0 => Rotation::R0,
            Rotation::R90 => Rotation::R270,
            Rotation::R180 => Rotation::R180,
            Rotation::R270 => Rotation::R90,
        }
    }
}

impl ImageCrop {
    pub fn identity() -> Self {
        ImageCrop {
            top: 0,
            bottom: 0,
            left: 0,
            right: 0,
            rotation: Rotation::R0,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.top == 0 && self.bottom == 0 && self.left == 0 && self.right == 0
            && self.rotation == Rotation::R0
    }

    pub fn has_cut(&self) -> bool {
        self.top != 0 || self.bottom != 0 || self.left != 0 || self.right != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SizeDim {
    Height,
    Width,
    Area,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Units {
    Inches,
    Cm,
    Points,
}

impl Units {
    /// Conversion factor to inches (1 in = 2.54 cm = 72.27 pt).
    fn per_inch(self) -> Rational64 {
        match self {
            Units::Inches => Rational64::new(1, 1),
            Units::Cm => Rational64::new(254, 100),
            Units::Points => Rational64::new(7227, 100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    pub dim: SizeDim,
    pub size: Rational64,
    pub units: Units,
}

impl ImageSize {
    pub fn new(dim: SizeDim, size: f64, units: Units) -> Self {
        ImageSize {
            dim,
            size: approx(size),
            units,
        }
    }

    /// `size` expressed in inches (or square inches for `Area`), clamped by
    /// the sanity policy from spec.md §3.
    pub fn sane_inches(&self) -> Rational64 {
        let per_inch = self.units.per_inch();
        let inches = match self.dim {
            SizeDim::Area => self.size / (per_inch * per_inch),
            SizeDim::Height | SizeDim::Width => self.size / per_inch,
        };
        let (lo, hi) = match self.dim {
            SizeDim::Area => (Rational64::new(1, 16), Rational64::new(625, 1)),
            SizeDim::Height | SizeDim::Width => (Rational64::new(1, 4), Rational64::new(25, 1)),
        };
        inches.max(lo).min(hi)
    }
}

/// Compute the scale factor (applied to pixel dimensions) that realizes
/// `size` at `dpi` for an image whose current pixel dimensions are
/// `(width, height)`.
///
/// Mirrors spec.md §4.E `scale_from_dpi`: for `Height`/`Width`, the scale is
/// `(sane_inches * dpi) / current_dimension_px`; for `Area`, the scale is
/// the square root of the area ratio (since area scales with the square of
/// the linear scale factor).
pub fn scale_from_dpi(dpi: Rational64, size: &ImageSize, width: u32, height: u32) -> f64 {
    let inches = to_f64(size.sane_inches());
    let dpi = to_f64(dpi);
    match size.dim {
        SizeDim::Width => (inches * dpi) / width as f64,
        SizeDim::Height => (inches * dpi) / height as f64,
        SizeDim::Area => {
            let target_px_area = inches * dpi * dpi;
            let current_px_area = (width as f64) * (height as f64);
            (target_px_area / current_px_area).sqrt()
        }
    }
}
