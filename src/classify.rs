//! Tile-level k-NN retrieval aggregated into a single defect verdict.

use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use image::RgbImage;
use log::debug;
use serde::Serialize;

use crate::encoder::{Embedder, ImageEncoder};
use crate::error::{DefectError, Result};
use crate::store::{Neighbor, VectorStore};
use crate::tiler::{self, Tile};

/// Numerator of the distance-to-score transform
pub const SCORE_SCALE: f64 = 100_000.0;

/// Accept `scale` only when the transform stays positive and strictly
/// decreasing, i.e. a finite value above zero.
pub fn check_score_scale(scale: f64) -> Result<f64> {
    if scale.is_finite() && scale > 0.0 {
        Ok(scale)
    } else {
        Err(DefectError::InvalidInput(format!("score scale must be positive, got {}", scale)))
    }
}

/// `scale / (distance + 1)`: strictly decreasing, `scale` at zero distance,
/// always positive.
pub fn similarity_score(distance: f32, scale: f64) -> f64 {
    scale / (distance as f64 + 1.0)
}

/// One neighbor returned for one query tile
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    /// Index of the query tile
    pub tile: usize,
    /// Zero-based neighbor rank within that tile's results
    pub rank: usize,
    /// Corner of the query tile in the query image
    pub coord: (u32, u32),
    pub defect_type: String,
    pub source_filename: String,
    pub distance: f32,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evidence {
    pub source_filename: String,
    pub score: f64,
}

/// Accumulated score of one defect type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DefectTally {
    pub defect_type: String,
    pub total_score: f64,
    /// Contributing reference files in retrieval order
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunnerUp {
    pub defect_type: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub defect_type: String,
    pub score: f64,
    pub evidence: Vec<Evidence>,
    /// Second ranked type; how large a gap is decisive is left to the caller
    pub runner_up: Option<RunnerUp>,
    /// Every retrieved neighbor across all tiles
    pub hits: Vec<Hit>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Verdict(Verdict),
    /// The reference library returned nothing for any tile
    NoVerdict,
}

/// Flatten per-tile neighbor lists into scored hits, tile by tile.
pub fn collect_hits(tiles: &[Tile], results: Vec<Vec<Neighbor>>, scale: f64) -> Vec<Hit> {
    tiles
        .iter()
        .zip(results)
        .enumerate()
        .flat_map(|(i, (tile, neighbors))| {
            neighbors.into_iter().enumerate().map(move |(rank, n)| Hit {
                tile: i,
                rank,
                coord: tile.coord,
                score: similarity_score(n.distance, scale),
                distance: n.distance,
                defect_type: n.record.defect_type,
                source_filename: n.record.source_filename,
            })
        })
        .collect()
}

/// Sum scores per defect type. Types appear in the order they were first
/// encountered; types without hits are absent.
pub fn aggregate(hits: &[Hit]) -> Vec<DefectTally> {
    let mut tallies: Vec<DefectTally> = vec![];
    let mut position = HashMap::new();

    for hit in hits {
        let i = *position.entry(hit.defect_type.as_str()).or_insert_with(|| {
            tallies.push(DefectTally {
                defect_type: hit.defect_type.clone(),
                total_score: 0.0,
                evidence: vec![],
            });
            tallies.len() - 1
        });
        let tally = &mut tallies[i];
        tally.total_score += hit.score;
        tally.evidence.push(Evidence {
            source_filename: hit.source_filename.clone(),
            score: hit.score,
        });
    }

    tallies
}

/// Order tallies by total score, highest first. The sort is stable, so exact
/// ties keep first-encounter order.
pub fn rank(mut tallies: Vec<DefectTally>) -> Vec<DefectTally> {
    tallies.sort_by(|a, b| b.total_score.total_cmp(&a.total_score));
    tallies
}

pub fn decide(hits: Vec<Hit>) -> Outcome {
    let mut ranked = rank(aggregate(&hits)).into_iter();
    let Some(best) = ranked.next() else {
        return Outcome::NoVerdict;
    };
    let runner_up =
        ranked.next().map(|t| RunnerUp { defect_type: t.defect_type, score: t.total_score });

    Outcome::Verdict(Verdict {
        defect_type: best.defect_type,
        score: best.total_score,
        evidence: best.evidence,
        runner_up,
        hits,
    })
}

/// Classifies query images against the reference library held in `S`.
pub struct Classifier<E, S> {
    embedder: Embedder<E>,
    store: S,
    tile_size: u32,
    stride: u32,
    score_scale: f64,
}

impl<E: ImageEncoder, S: VectorStore> Classifier<E, S> {
    pub fn new(embedder: Embedder<E>, store: S) -> Self {
        Self { embedder, store, tile_size: 518, stride: 259, score_scale: SCORE_SCALE }
    }

    pub fn tiling(mut self, tile_size: u32, stride: u32) -> Self {
        self.tile_size = tile_size;
        self.stride = stride;
        self
    }

    pub fn score_scale(mut self, score_scale: f64) -> Result<Self> {
        self.score_scale = check_score_scale(score_scale)?;
        Ok(self)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Classify the image stored at `path`.
    pub async fn classify(&self, path: impl AsRef<Path>, k: usize) -> Result<Outcome> {
        let path = path.as_ref();
        let tiles = tiler::tile_file(path, self.tile_size, self.stride)?;
        if tiles.is_empty() {
            return Err(DefectError::ImageUnreadable {
                path: path.to_path_buf(),
                reason: "image has no pixels".into(),
            });
        }
        self.classify_tiles(&tiles, k).await
    }

    /// Classify an already decoded image.
    pub async fn classify_image(&self, image: &RgbImage, k: usize) -> Result<Outcome> {
        let tiles = tiler::tile_image(image, self.tile_size, self.stride);
        if tiles.is_empty() {
            return Err(DefectError::ImageUnreadable {
                path: Default::default(),
                reason: "image has no pixels".into(),
            });
        }
        self.classify_tiles(&tiles, k).await
    }

    async fn classify_tiles(&self, tiles: &[Tile], k: usize) -> Result<Outcome> {
        let start = Instant::now();
        let vectors = self.embedder.embed(tiles)?;
        let results = self.store.search(vectors.view(), k).await?;
        let hits = collect_hits(tiles, results, self.score_scale);
        debug!(
            "{} tiles, {} neighbors, search time: {:.2}s",
            tiles.len(),
            hits.len(),
            start.elapsed().as_secs_f32()
        );
        Ok(decide(hits))
    }
}
