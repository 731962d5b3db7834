// src/key.rs
//
// ImageFile and ImageKey: the data model spec.md §3 builds the derivation
// graph from. Structural equality/ordering is derived (componentwise) and
// stable across process restarts, since ImageKey is the serialized lookup
// key for the derivation cache.

use crate::file_cache::File;
use crate::geometry::{ImageCrop, ImageSize, ImageType};
use num_rational::Rational64;
use serde::{Deserialize, Serialize};

/// A concrete, decoded image backed by a byte-cache `File`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImageFile {
    pub file: File,
    pub image_type: ImageType,
    pub width: u32,
    pub height: u32,
    pub max_val: u32,
}

/// Recursive description of a derivation. Equality/ordering are
/// componentwise and derived, so two keys built the same way always
/// compare equal regardless of process restarts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ImageKey {
    Original(ImageFile),
    Upright(Box<ImageKey>),
    Scaled(ImageSize, Rational64, Box<ImageKey>),
    Cropped(ImageCrop, Box<ImageKey>),
}

impl ImageKey {
    pub fn upright(inner: ImageKey) -> Self {
        ImageKey::Upright(Box::new(inner))
    }

    pub fn scaled(size: ImageSize, dpi: Rational64, inner: ImageKey) -> Self {
        ImageKey::Scaled(size, dpi, Box::new(inner))
    }

    pub fn cropped(crop: ImageCrop, inner: ImageKey) -> Self {
        ImageKey::Cropped(crop, Box::new(inner))
    }

    /// The innermost `Original` image this key ultimately derives from.
    pub fn root(&self) -> &ImageFile {
        match self {
            ImageKey::Original(img) => img,
            ImageKey::Upright(inner) | ImageKey::Cropped(_, inner) => inner.root(),
            ImageKey::Scaled(_, _, inner) => inner.root(),
        }
    }
}
