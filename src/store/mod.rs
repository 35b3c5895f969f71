//! Embedding storage with k-nearest-neighbor lookup.
//!
//! Two backends share the [`VectorStore`] contract: [`FlatStore`] keeps an
//! exact in-process index that is saved as an index/metadata file pair, and
//! [`PgStore`] keeps self-contained rows in a pgvector table.

mod flat;
mod pg;

use std::future::Future;

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

pub use flat::{FlatIndex, FlatStore};
pub use pg::PgStore;

use crate::error::{DefectError, Result};

/// Metadata stored alongside each embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRecord {
    /// Join key back to the embedding
    pub id: u64,
    /// Label the source image was ingested under
    pub defect_type: String,
    /// File name of the source image, without its directory
    pub source_filename: String,
    /// Top-left corner of the tile in the source image
    pub coord: (u32, u32),
}

/// A record that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTile {
    pub defect_type: String,
    pub source_filename: String,
    pub coord: (u32, u32),
}

impl NewTile {
    pub fn with_id(self, id: u64) -> TileRecord {
        TileRecord {
            id,
            defect_type: self.defect_type,
            source_filename: self.source_filename,
            coord: self.coord,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub record: TileRecord,
    /// Euclidean distance to the query vector
    pub distance: f32,
}

pub trait VectorStore {
    /// Length of the stored vectors
    fn dimension(&self) -> usize;

    /// Total number of stored vectors
    fn count(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Append `vectors` with their paired `tiles` as one unit, returning the
    /// assigned ids in input order. Nothing is stored when an error is returned.
    fn add(
        &mut self,
        vectors: ArrayView2<'_, f32>,
        tiles: Vec<NewTile>,
    ) -> impl Future<Output = Result<Vec<u64>>> + Send;

    /// For every query row, up to `k` nearest stored vectors by ascending distance
    fn search(
        &self,
        queries: ArrayView2<'_, f32>,
        k: usize,
    ) -> impl Future<Output = Result<Vec<Vec<Neighbor>>>> + Send;

    /// The first `limit` records in id order
    fn records(&self, limit: usize) -> impl Future<Output = Result<Vec<TileRecord>>> + Send;
}

/// Validate a batch before anything is written.
fn check_batch(dimension: usize, vectors: &ArrayView2<'_, f32>, tiles: usize) -> Result<()> {
    let (rows, cols) = vectors.dim();
    if cols != dimension {
        return Err(DefectError::DimensionMismatch { expected: dimension, actual: cols });
    }
    if rows != tiles {
        return Err(DefectError::InvalidInput(format!(
            "{} vectors paired with {} records",
            rows, tiles
        )));
    }
    Ok(())
}

/// Validate the query matrix against the store dimension.
fn check_queries(dimension: usize, queries: &ArrayView2<'_, f32>) -> Result<()> {
    let cols = queries.ncols();
    if cols != dimension {
        return Err(DefectError::DimensionMismatch { expected: dimension, actual: cols });
    }
    Ok(())
}
