use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::classify::{Classifier, Outcome};
use crate::cli::SubCommandExtend;
use crate::config::{Backend, EncoderOptions, Opts, OutputFormat, SearchOptions, TileOptions};
use crate::encoder::{Embedder, ImageEncoder};
use crate::store::{FlatStore, PgStore, VectorStore};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub tile: TileOptions,
    #[command(flatten)]
    pub encoder: EncoderOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// Image to classify
    pub image: PathBuf,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let embedder = self.encoder.build()?;
        match opts.backend {
            Backend::Flat => {
                let store = FlatStore::open(opts.conf_dir.index(), opts.conf_dir.metadata())?;
                self.classify(classifier(embedder, store, &self.tile, &self.search)?).await
            }
            Backend::Pg => {
                let store = PgStore::open(opts.database_url()?, &opts.table).await?;
                self.classify(classifier(embedder, store, &self.tile, &self.search)?).await
            }
        }
    }
}

impl SearchCommand {
    async fn classify<E, S>(&self, classifier: Classifier<E, S>) -> Result<()>
    where
        E: ImageEncoder,
        S: VectorStore + Sync,
    {
        let outcome = classifier.classify(&self.image, self.search.k).await?;
        print_outcome(&outcome, self.search.output_format)
    }
}

pub(crate) fn classifier<E, S>(
    embedder: Embedder<E>,
    store: S,
    tile: &TileOptions,
    search: &SearchOptions,
) -> Result<Classifier<E, S>>
where
    E: ImageEncoder,
    S: VectorStore,
{
    Ok(Classifier::new(embedder, store)
        .tiling(tile.tile_size, tile.stride)
        .score_scale(search.score_scale)?)
}

pub(crate) fn print_outcome(outcome: &Outcome, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(outcome)?);
        }
        OutputFormat::Table => match outcome {
            Outcome::NoVerdict => println!("no verdict: nothing was retrieved"),
            Outcome::Verdict(verdict) => {
                println!("tile\tx,y\trank\tdefect_type\tsource\tdistance\tscore");
                for hit in &verdict.hits {
                    println!(
                        "{}\t{},{}\t{}\t{}\t{}\t{:.4}\t{:.2}",
                        hit.tile,
                        hit.coord.0,
                        hit.coord.1,
                        hit.rank + 1,
                        hit.defect_type,
                        hit.source_filename,
                        hit.distance,
                        hit.score
                    );
                }
                println!();
                println!("verdict: {} ({:.2})", verdict.defect_type, verdict.score);
                for (i, evidence) in verdict.evidence.iter().enumerate() {
                    println!("  {}. {}\t{:.2}", i + 1, evidence.source_filename, evidence.score);
                }
                if let Some(runner_up) = &verdict.runner_up {
                    println!("runner-up: {} ({:.2})", runner_up.defect_type, runner_up.score);
                }
            }
        },
    }
    Ok(())
}
