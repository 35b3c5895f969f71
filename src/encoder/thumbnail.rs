use ndarray::{Array2, ArrayView4, s};

use super::ImageEncoder;
use crate::error::{DefectError, Result};

/// Model-free encoder: average-pools every channel over a `grid × grid` cell
/// layout, giving a `3 · grid²` vector.
///
/// Each row only depends on its own input, so batched and per-tile calls
/// produce identical vectors.
#[derive(Debug, Clone)]
pub struct ThumbnailEncoder {
    grid: usize,
}

impl ThumbnailEncoder {
    pub fn new(grid: usize) -> Self {
        Self { grid: grid.max(1) }
    }
}

impl ImageEncoder for ThumbnailEncoder {
    fn dimension(&self) -> usize {
        3 * self.grid * self.grid
    }

    fn encode(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>> {
        let (n, channels, height, width) = batch.dim();
        let g = self.grid;
        if channels != 3 {
            return Err(DefectError::Encoder(format!("expected 3 channels, got {}", channels)));
        }
        if height < g || width < g {
            return Err(DefectError::Encoder(format!(
                "input {}x{} is smaller than the {}x{} grid",
                width, height, g, g
            )));
        }

        let mut output = Array2::zeros((n, self.dimension()));
        for (item, mut row) in batch.outer_iter().zip(output.outer_iter_mut()) {
            for c in 0..3 {
                for gy in 0..g {
                    let (y0, y1) = (gy * height / g, (gy + 1) * height / g);
                    for gx in 0..g {
                        let (x0, x1) = (gx * width / g, (gx + 1) * width / g);
                        let cell = item.slice(s![c, y0..y1, x0..x1]);
                        row[(c * g + gy) * g + gx] = cell.mean().unwrap_or(0.0);
                    }
                }
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};
    use ndarray::Axis;

    use super::*;
    use crate::encoder::preprocess;
    use crate::tiler::Tile;

    fn gradient(seed: u8) -> Tile {
        let image = RgbImage::from_fn(32, 32, |x, y| {
            Rgb([seed.wrapping_add(x as u8), (y * 7) as u8, seed.wrapping_mul(3)])
        });
        Tile { image, coord: (0, 0) }
    }

    #[test]
    fn test_dimension() {
        assert_eq!(ThumbnailEncoder::new(8).dimension(), 192);
        assert_eq!(ThumbnailEncoder::new(0).dimension(), 3);
    }

    #[test]
    fn test_batched_equals_single() {
        let encoder = ThumbnailEncoder::new(4);
        let tiles = [gradient(1), gradient(90), gradient(200)];
        let batch = preprocess(&tiles, 32);
        let batched = encoder.encode(batch.view()).unwrap();

        for (i, tile) in tiles.iter().enumerate() {
            let single = preprocess(std::slice::from_ref(tile), 32);
            let single = encoder.encode(single.view()).unwrap();
            assert_eq!(single.index_axis(Axis(0), 0), batched.index_axis(Axis(0), i));
        }
    }

    #[test]
    fn test_uniform_tile_has_uniform_cells() {
        let encoder = ThumbnailEncoder::new(2);
        let tile = Tile { image: RgbImage::from_pixel(8, 8, Rgb([255, 255, 255])), coord: (0, 0) };
        let batch = preprocess(&[tile], 8);
        let v = encoder.encode(batch.view()).unwrap();
        let red = batch[[0, 0, 0, 0]];
        for i in 0..4 {
            assert!((v[[0, i]] - red).abs() < 1e-5);
        }
    }

    #[test]
    fn test_rejects_small_input() {
        let encoder = ThumbnailEncoder::new(8);
        let batch = ndarray::Array4::<f32>::zeros((1, 3, 4, 4));
        assert!(encoder.encode(batch.view()).is_err());
    }
}
