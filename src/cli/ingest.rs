use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::ProgressBar;

use crate::cli::SubCommandExtend;
use crate::config::{Backend, EncoderOptions, Opts, TileOptions};
use crate::ingest::{DEFAULT_SUFFIX, IngestReport, Ingestor, suffix_regex};
use crate::store::{FlatStore, PgStore};
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct IngestCommand {
    #[command(flatten)]
    pub tile: TileOptions,
    #[command(flatten)]
    pub encoder: EncoderOptions,
    /// Dataset root; every subdirectory is a defect type holding its images
    pub path: PathBuf,
    /// Image extensions to scan, comma separated
    #[arg(short, long, default_value = DEFAULT_SUFFIX)]
    pub suffix: String,
}

impl SubCommandExtend for IngestCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let embedder = self.encoder.build()?;
        let ingestor = Ingestor {
            embedder: &embedder,
            tile_size: self.tile.tile_size,
            stride: self.tile.stride,
            suffix: suffix_regex(&self.suffix).context("invalid suffix list")?,
        };
        let pb = ProgressBar::no_length().with_style(pb_style());

        let report = match opts.backend {
            Backend::Flat => {
                let conf_dir = opts.conf_dir.path();
                fs::create_dir_all(conf_dir)
                    .with_context(|| format!("creating {}", conf_dir.display()))?;
                let (index, meta) = (opts.conf_dir.index(), opts.conf_dir.metadata());

                let mut store = FlatStore::open_or_create(&index, &meta, embedder.dimension())?;
                let report = ingestor.ingest_folder(&self.path, &mut store, &pb).await?;
                store.save(&index, &meta)?;
                report
            }
            Backend::Pg => {
                let url = opts.database_url()?;
                let mut store = PgStore::connect(url, &opts.table, embedder.dimension()).await?;
                ingestor.ingest_folder(&self.path, &mut store, &pb).await?
            }
        };
        pb.finish_and_clear();

        print_report(&report);
        Ok(())
    }
}

fn print_report(report: &IngestReport) {
    for (defect_type, images) in &report.per_type {
        println!("{}\t{}", defect_type, images);
    }
    println!(
        "added {} images ({} tiles), skipped {}",
        report.images, report.tiles, report.skipped
    );
}
