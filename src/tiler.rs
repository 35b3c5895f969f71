//! Splits a source image into fixed-size, possibly overlapping tiles.

use std::path::Path;

use image::RgbImage;
use image::imageops::{self, FilterType};
use log::debug;

use crate::error::{DefectError, Result};

/// A square crop of a source image and its top-left corner in source pixels.
#[derive(Debug, Clone)]
pub struct Tile {
    pub image: RgbImage,
    pub coord: (u32, u32),
}

/// Cut `image` into `tile_size × tile_size` tiles, stepping `stride` pixels.
///
/// Candidate corners are enumerated row by row (`y` outer, `x` inner) and a
/// candidate is kept only if the whole crop lies inside the image. Images
/// with a side shorter than `tile_size`, or grids that accept no candidate,
/// produce a single tile: the whole image resized to `tile_size`, at `(0, 0)`.
///
/// A medium sized image may be covered by fewer tiles than its size suggests,
/// e.g. a 600×600 image with tile 518 / stride 259 only yields the tile at
/// `(0, 0)`. This is the expected behavior.
pub fn tile_image(image: &RgbImage, tile_size: u32, stride: u32) -> Vec<Tile> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || tile_size == 0 {
        return vec![];
    }
    if width < tile_size || height < tile_size {
        return vec![resized_whole(image, tile_size)];
    }

    let stride = stride.max(1) as usize;
    let mut tiles = vec![];
    for y in (0..height).step_by(stride) {
        for x in (0..width).step_by(stride) {
            if x + tile_size > width || y + tile_size > height {
                continue;
            }
            let crop = imageops::crop_imm(image, x, y, tile_size, tile_size).to_image();
            tiles.push(Tile { image: crop, coord: (x, y) });
        }
    }

    if tiles.is_empty() {
        tiles.push(resized_whole(image, tile_size));
    }
    tiles
}

/// Decode the file at `path` and tile it.
pub fn tile_file(path: impl AsRef<Path>, tile_size: u32, stride: u32) -> Result<Vec<Tile>> {
    let path = path.as_ref();
    let image = image::open(path)
        .map_err(|e| DefectError::ImageUnreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
        .to_rgb8();
    let tiles = tile_image(&image, tile_size, stride);
    debug!("{}: {}x{} -> {} tiles", path.display(), image.width(), image.height(), tiles.len());
    Ok(tiles)
}

fn resized_whole(image: &RgbImage, tile_size: u32) -> Tile {
    let resized = imageops::resize(image, tile_size, tile_size, FilterType::CatmullRom);
    Tile { image: resized, coord: (0, 0) }
}
