use anyhow::Result;
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::{Backend, Opts};
use crate::store::{FlatStore, PgStore, VectorStore};

#[derive(Parser, Debug, Clone)]
pub struct InspectCommand {
    /// Number of records to list
    #[arg(short = 'n', long, default_value_t = 5)]
    pub limit: usize,
}

impl SubCommandExtend for InspectCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        match opts.backend {
            Backend::Flat => {
                let store = FlatStore::open(opts.conf_dir.index(), opts.conf_dir.metadata())?;
                self.inspect(&store).await
            }
            Backend::Pg => {
                let store = PgStore::open(opts.database_url()?, &opts.table).await?;
                self.inspect(&store).await
            }
        }
    }
}

impl InspectCommand {
    async fn inspect<S: VectorStore + Sync>(&self, store: &S) -> Result<()> {
        println!("vectors: {}", store.count().await?);
        println!("dimension: {}", store.dimension());
        for record in store.records(self.limit).await? {
            println!(
                "{}\t{}\t{}\t{},{}",
                record.id, record.defect_type, record.source_filename, record.coord.0, record.coord.1
            );
        }
        Ok(())
    }
}
