//! Turns tiles into embedding vectors.
//!
//! The model itself is opaque: anything implementing [`ImageEncoder`] maps a
//! normalised `N×3×S×S` batch to an `N×D` matrix. Resizing and per-channel
//! normalisation happen here so every encoder sees the same input.

mod thumbnail;

#[cfg(feature = "onnx")]
mod onnx;

use std::borrow::Cow;

use image::imageops::{self, FilterType};
use log::debug;
use ndarray::{Array2, Array4, ArrayView4};
#[cfg(feature = "onnx")]
pub use onnx::OnnxEncoder;
pub use thumbnail::ThumbnailEncoder;

use crate::error::{DefectError, Result};
use crate::tiler::Tile;

/// ImageNet channel means, in RGB order
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations, in RGB order
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

pub trait ImageEncoder: Send + Sync {
    /// Length of every produced vector
    fn dimension(&self) -> usize;

    /// Encode a normalised batch, returning one row per input in input order
    fn encode(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>>;
}

impl ImageEncoder for Box<dyn ImageEncoder> {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn encode(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>> {
        (**self).encode(batch)
    }
}

/// Resize every tile to `input_size` and build a normalised `N×3×S×S` tensor.
pub fn preprocess(tiles: &[Tile], input_size: u32) -> Array4<f32> {
    let size = input_size as usize;
    let mut batch = Array4::zeros((tiles.len(), 3, size, size));

    for (mut dst, tile) in batch.outer_iter_mut().zip(tiles) {
        let image = if tile.image.dimensions() == (input_size, input_size) {
            Cow::Borrowed(&tile.image)
        } else {
            Cow::Owned(imageops::resize(&tile.image, input_size, input_size, FilterType::Triangle))
        };
        for (x, y, pixel) in image.enumerate_pixels() {
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                dst[[c, y as usize, x as usize]] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            }
        }
    }

    batch
}

/// An encoder together with the input resolution it expects.
pub struct Embedder<E> {
    encoder: E,
    input_size: u32,
}

impl<E: ImageEncoder> Embedder<E> {
    pub fn new(encoder: E, input_size: u32) -> Self {
        Self { encoder, input_size }
    }

    pub fn dimension(&self) -> usize {
        self.encoder.dimension()
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    /// Embed all tiles in one batch.
    pub fn embed(&self, tiles: &[Tile]) -> Result<Array2<f32>> {
        let dimension = self.dimension();
        if tiles.is_empty() {
            return Ok(Array2::zeros((0, dimension)));
        }

        let batch = preprocess(tiles, self.input_size);
        let vectors = self.encoder.encode(batch.view())?;

        let (rows, cols) = vectors.dim();
        if rows != tiles.len() {
            return Err(DefectError::Encoder(format!(
                "expected {} vectors, got {}",
                tiles.len(),
                rows
            )));
        }
        if cols != dimension {
            return Err(DefectError::DimensionMismatch { expected: dimension, actual: cols });
        }
        debug!("embedded {} tiles into {}-d vectors", rows, cols);
        Ok(vectors)
    }
}
