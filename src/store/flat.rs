use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use ndarray::{Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{NewTile, Neighbor, TileRecord, VectorStore, check_batch, check_queries};
use crate::error::{DefectError, Result};

/// Exact L2 index over keyed rows.
///
/// Every row carries the key it was added with and searches return those
/// keys, so metadata is joined by key rather than by position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatIndex {
    dimension: usize,
    keys: Vec<u64>,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dimension: usize) -> Self {
        Self { dimension, keys: vec![], data: vec![] }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[u64] {
        &self.keys
    }

    /// Append rows of `vectors` under `keys`. The caller checks shapes.
    pub fn add_with_keys(&mut self, vectors: ArrayView2<'_, f32>, keys: &[u64]) {
        debug_assert_eq!(vectors.dim(), (keys.len(), self.dimension));
        self.keys.extend_from_slice(keys);
        self.data.extend(vectors.iter().copied());
    }

    /// All stored rows as a `len × dimension` view
    pub fn vectors(&self) -> ArrayView2<'_, f32> {
        ArrayView2::from_shape((self.len(), self.dimension), &self.data)
            .expect("row data always holds len * dimension values")
    }

    /// Return up to `k` `(key, distance)` pairs per query, nearest first.
    /// Equal distances keep insertion order.
    pub fn search(&self, queries: ArrayView2<'_, f32>, k: usize) -> Vec<Vec<(u64, f32)>> {
        (0..queries.nrows()).into_par_iter().map(|i| self.search_one(queries.row(i), k)).collect()
    }

    fn search_one(&self, query: ArrayView1<'_, f32>, k: usize) -> Vec<(u64, f32)> {
        if k == 0 || self.dimension == 0 || self.is_empty() {
            return vec![];
        }

        let mut dis = self
            .data
            .chunks_exact(self.dimension)
            .map(|row| l2_squared(query, row))
            .enumerate()
            .collect::<Vec<_>>();

        let cmp = |a: &(usize, f32), b: &(usize, f32)| -> Ordering {
            a.1.total_cmp(&b.1).then(a.0.cmp(&b.0))
        };
        if dis.len() > k {
            dis.select_nth_unstable_by(k, cmp);
            dis.truncate(k);
        }
        dis.sort_unstable_by(cmp);

        dis.into_iter().map(|(i, d)| (self.keys[i], d.sqrt())).collect()
    }
}

#[inline(always)]
fn l2_squared(a: ArrayView1<'_, f32>, b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Metadata file contents, tied to one specific index file
#[derive(Serialize, Deserialize)]
struct MetaFile {
    dimension: usize,
    /// blake3 digest of the serialized index it was saved with
    index_digest: [u8; 32],
    records: Vec<TileRecord>,
}

/// In-process backend: a [`FlatIndex`] plus metadata keyed by the index keys.
#[derive(Debug, Clone)]
pub struct FlatStore {
    index: FlatIndex,
    records: BTreeMap<u64, TileRecord>,
}

impl FlatStore {
    pub fn new(dimension: usize) -> Self {
        Self { index: FlatIndex::new(dimension), records: BTreeMap::new() }
    }

    /// Load a store saved by [`FlatStore::save`]. Both files must exist and
    /// must have been written together.
    pub fn open(index_path: impl AsRef<Path>, meta_path: impl AsRef<Path>) -> Result<Self> {
        let (index_path, meta_path) = (index_path.as_ref(), meta_path.as_ref());
        for path in [index_path, meta_path] {
            if !path.exists() {
                return Err(DefectError::StoreUnavailable(format!(
                    "{} does not exist",
                    path.display()
                )));
            }
        }

        debug!("reading index from {}", index_path.display());
        let index_bytes = fs::read(index_path)?;
        let meta: MetaFile = bincode::deserialize(&fs::read(meta_path)?)?;

        if blake3::hash(&index_bytes).as_bytes() != &meta.index_digest {
            return Err(DefectError::StoreMismatch(format!(
                "{} was not saved together with {}",
                meta_path.display(),
                index_path.display()
            )));
        }

        let index: FlatIndex = bincode::deserialize(&index_bytes)?;
        if index.dimension != meta.dimension {
            return Err(DefectError::StoreMismatch(format!(
                "index dimension {} but metadata dimension {}",
                index.dimension, meta.dimension
            )));
        }
        if !index.keys.iter().copied().eq(meta.records.iter().map(|r| r.id)) {
            return Err(DefectError::StoreMismatch("index keys differ from record ids".into()));
        }

        let records = meta.records.into_iter().map(|r| (r.id, r)).collect::<BTreeMap<_, _>>();
        info!("loaded {} tiles ({}-d) from {}", index.len(), index.dimension, index_path.display());
        Ok(Self { index, records })
    }

    /// Open an existing store or start an empty one when neither file exists.
    pub fn open_or_create(
        index_path: impl AsRef<Path>,
        meta_path: impl AsRef<Path>,
        dimension: usize,
    ) -> Result<Self> {
        let (index_path, meta_path) = (index_path.as_ref(), meta_path.as_ref());
        if !index_path.exists() && !meta_path.exists() {
            info!("creating new flat store ({}-d)", dimension);
            return Ok(Self::new(dimension));
        }
        let store = Self::open(index_path, meta_path)?;
        if store.dimension() != dimension {
            return Err(DefectError::DimensionMismatch {
                expected: store.dimension(),
                actual: dimension,
            });
        }
        Ok(store)
    }

    /// Write the index and metadata files. Both are staged next to their
    /// destinations and only renamed into place once both writes succeeded.
    pub fn save(&self, index_path: impl AsRef<Path>, meta_path: impl AsRef<Path>) -> Result<()> {
        let (index_path, meta_path) = (index_path.as_ref(), meta_path.as_ref());

        let index_bytes = bincode::serialize(&self.index)?;
        let meta = MetaFile {
            dimension: self.index.dimension,
            index_digest: *blake3::hash(&index_bytes).as_bytes(),
            records: self.records.values().cloned().collect(),
        };
        let meta_bytes = bincode::serialize(&meta)?;

        let index_tmp = tmp_path(index_path);
        let meta_tmp = tmp_path(meta_path);
        fs::write(&index_tmp, &index_bytes)?;
        fs::write(&meta_tmp, &meta_bytes)?;
        fs::rename(&index_tmp, index_path)?;
        if let Err(e) = fs::rename(&meta_tmp, meta_path) {
            warn!(
                "{} was replaced but {} was not: {}",
                index_path.display(),
                meta_path.display(),
                e
            );
            return Err(DefectError::StoreMismatch(format!(
                "failed to replace {} after {} was written ({}); delete both files and ingest again",
                meta_path.display(),
                index_path.display(),
                e
            )));
        }

        info!("saved {} tiles to {}", self.index.len(), index_path.display());
        Ok(())
    }

    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    /// All records in id order
    pub fn metadata(&self) -> impl Iterator<Item = &TileRecord> {
        self.records.values()
    }

    /// Copy of every stored vector, one row per tile in id order
    pub fn export(&self) -> Array2<f32> {
        self.index.vectors().to_owned()
    }
}

impl VectorStore for FlatStore {
    fn dimension(&self) -> usize {
        self.index.dimension
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.index.len() as u64)
    }

    async fn add(&mut self, vectors: ArrayView2<'_, f32>, tiles: Vec<NewTile>) -> Result<Vec<u64>> {
        check_batch(self.index.dimension, &vectors, tiles.len())?;

        let start_id = self.index.len() as u64;
        let ids = (start_id..start_id + tiles.len() as u64).collect::<Vec<_>>();

        self.index.add_with_keys(vectors, &ids);
        for (&id, tile) in ids.iter().zip(tiles) {
            self.records.insert(id, tile.with_id(id));
        }
        Ok(ids)
    }

    async fn search(&self, queries: ArrayView2<'_, f32>, k: usize) -> Result<Vec<Vec<Neighbor>>> {
        check_queries(self.index.dimension, &queries)?;

        self.index
            .search(queries, k)
            .into_iter()
            .map(|neighbors| {
                neighbors
                    .into_iter()
                    .map(|(id, distance)| {
                        let record = self.records.get(&id).cloned().ok_or_else(|| {
                            DefectError::StoreMismatch(format!("no record for id {}", id))
                        })?;
                        Ok(Neighbor { record, distance })
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect()
    }

    async fn records(&self, limit: usize) -> Result<Vec<TileRecord>> {
        Ok(self.records.values().take(limit).cloned().collect())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = OsString::from(path.as_os_str());
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
