//! Builds the reference library from `root/<defect_type>/<image>` folders.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use indicatif::ProgressBar;
use log::{info, warn};
use regex::Regex;
use serde::Serialize;
use walkdir::WalkDir;

use crate::encoder::{Embedder, ImageEncoder};
use crate::error::Result;
use crate::store::{NewTile, VectorStore};
use crate::tiler;

/// Extensions recognised by default, comma separated
pub const DEFAULT_SUFFIX: &str = "png,jpg,jpeg,bmp,tif,tiff";

/// Build a case-insensitive extension matcher from a comma separated list.
/// Entries are trimmed and matched literally; empty entries are ignored.
pub fn suffix_regex(suffix: &str) -> std::result::Result<Regex, regex::Error> {
    let alternatives = suffix
        .split(',')
        .map(str::trim)
        .filter(|ext| !ext.is_empty())
        .map(regex::escape)
        .collect::<Vec<_>>();
    Regex::new(&format!("(?i)^({})$", alternatives.join("|")))
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    /// Images tiled, embedded and stored
    pub images: usize,
    /// Images that could not be read
    pub skipped: usize,
    /// Tiles stored
    pub tiles: usize,
    /// Stored images per defect type
    pub per_type: BTreeMap<String, usize>,
}

pub struct Ingestor<'a, E> {
    pub embedder: &'a Embedder<E>,
    pub tile_size: u32,
    pub stride: u32,
    pub suffix: Regex,
}

impl<E: ImageEncoder> Ingestor<'_, E> {
    /// Ingest every defect folder under `root` into `store`, one image at a
    /// time. Unreadable images are skipped; store and encoder errors abort.
    pub async fn ingest_folder<S: VectorStore>(
        &self,
        root: impl AsRef<Path>,
        store: &mut S,
        pb: &ProgressBar,
    ) -> Result<IngestReport> {
        let root = root.as_ref();
        info!("scanning {}", root.display());

        let folders = defect_folders(root)?;
        let folders = folders
            .into_iter()
            .map(|(defect_type, folder)| {
                let images = folder_images(&folder, &self.suffix)?;
                Ok((defect_type, images))
            })
            .collect::<Result<Vec<_>>>()?;
        pb.set_length(folders.iter().map(|(_, images)| images.len() as u64).sum());

        let mut report = IngestReport::default();
        for (defect_type, images) in folders {
            if images.is_empty() {
                pb.println(format!("{}: no images", defect_type));
                continue;
            }

            let mut added = 0;
            for path in images {
                pb.set_message(path.display().to_string());
                let count = self.ingest_image(&path, &defect_type, store).await?;
                match count {
                    Some(tiles) => {
                        added += 1;
                        report.tiles += tiles;
                    }
                    None => report.skipped += 1,
                }
                pb.inc(1);
            }

            info!("{}: {} images", defect_type, added);
            report.images += added;
            report.per_type.insert(defect_type, added);
        }

        Ok(report)
    }

    /// Returns the number of stored tiles, or `None` if the image was skipped.
    async fn ingest_image<S: VectorStore>(
        &self,
        path: &Path,
        defect_type: &str,
        store: &mut S,
    ) -> Result<Option<usize>> {
        let tiles = match tiler::tile_file(path, self.tile_size, self.stride) {
            Ok(tiles) if !tiles.is_empty() => tiles,
            Ok(_) => {
                warn!("skipping empty image: {}", path.display());
                return Ok(None);
            }
            Err(e) => {
                warn!("skipping {}", e);
                return Ok(None);
            }
        };

        let vectors = self.embedder.embed(&tiles)?;
        let source_filename = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let records = tiles
            .iter()
            .map(|tile| NewTile {
                defect_type: defect_type.to_string(),
                source_filename: source_filename.clone(),
                coord: tile.coord,
            })
            .collect::<Vec<_>>();

        store.add(vectors.view(), records).await?;
        Ok(Some(tiles.len()))
    }
}

/// Immediate subdirectories of `root` as `(defect_type, path)`, sorted by name
pub fn defect_folders(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut folders = vec![];
    for entry in WalkDir::new(root).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_dir() {
            let name = entry.file_name().to_string_lossy().to_string();
            folders.push((name, entry.into_path()));
        }
    }
    Ok(folders)
}

/// Immediate files of `folder` whose extension matches `suffix`, sorted by name
pub fn folder_images(folder: &Path, suffix: &Regex) -> Result<Vec<PathBuf>> {
    let mut images = vec![];
    for entry in WalkDir::new(folder).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matched = entry
            .path()
            .extension()
            .map(|ext| suffix.is_match(&ext.to_string_lossy()))
            .unwrap_or(false);
        if matched {
            images.push(entry.into_path());
        }
    }
    Ok(images)
}
