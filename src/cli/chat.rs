use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::warn;
use tokio::task::block_in_place;

use crate::classify::Classifier;
use crate::cli::SubCommandExtend;
use crate::cli::search::{classifier, print_outcome};
use crate::config::{Backend, EncoderOptions, Opts, SearchOptions, TileOptions};
use crate::encoder::ImageEncoder;
use crate::resolve::{is_quit, resolve_file};
use crate::store::{FlatStore, PgStore, VectorStore};
use crate::utils;

#[derive(Parser, Debug, Clone)]
pub struct ChatCommand {
    #[command(flatten)]
    pub tile: TileOptions,
    #[command(flatten)]
    pub encoder: EncoderOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// Folder whose images can be asked about
    pub dir: PathBuf,
}

impl SubCommandExtend for ChatCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let embedder = self.encoder.build()?;
        match opts.backend {
            Backend::Flat => {
                let store = FlatStore::open(opts.conf_dir.index(), opts.conf_dir.metadata())?;
                self.chat(classifier(embedder, store, &self.tile, &self.search)?).await
            }
            Backend::Pg => {
                let store = PgStore::open(opts.database_url()?, &opts.table).await?;
                self.chat(classifier(embedder, store, &self.tile, &self.search)?).await
            }
        }
    }
}

impl ChatCommand {
    async fn chat<E, S>(&self, classifier: Classifier<E, S>) -> Result<()>
    where
        E: ImageEncoder,
        S: VectorStore + Sync,
    {
        println!("Ask about an image in {}. Type `exit` to leave.", self.dir.display());
        while let Some(line) = block_in_place(|| utils::read_line("> "))? {
            if is_quit(&line) {
                break;
            }
            if line.trim().is_empty() {
                continue;
            }

            let path = match resolve_file(&line, &self.dir) {
                Ok(Some(path)) => path,
                Ok(None) => {
                    println!("no image in {} matches that", self.dir.display());
                    continue;
                }
                Err(e) => {
                    warn!("cannot list {}: {}", self.dir.display(), e);
                    continue;
                }
            };

            println!("{}", path.display());
            match classifier.classify(&path, self.search.k).await {
                Ok(outcome) => print_outcome(&outcome, self.search.output_format)?,
                Err(e) => println!("error: {}", e),
            }
        }
        Ok(())
    }
}
