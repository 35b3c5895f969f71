use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use log::info;
use ndarray_npy::write_npy;

use crate::cli::SubCommandExtend;
use crate::config::{Backend, Opts};
use crate::store::FlatStore;

#[derive(Parser, Debug, Clone)]
pub struct ExportCommand {
    /// Output file
    #[arg(short, long, default_value = "vectors.npy")]
    pub output: PathBuf,
}

impl SubCommandExtend for ExportCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        if opts.backend != Backend::Flat {
            bail!("export only supports the flat backend");
        }
        let store = FlatStore::open(opts.conf_dir.index(), opts.conf_dir.metadata())?;
        let data = store.export();
        write_npy(&self.output, &data)?;
        info!("exported {} vectors to {}", data.nrows(), self.output.display());
        Ok(())
    }
}
