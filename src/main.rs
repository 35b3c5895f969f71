use clap::Parser;
use defsearch::cli::SubCommandExtend;
use defsearch::config::{Opts, SubCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();

    match &opts.subcmd {
        SubCommand::Ingest(config) => config.run(&opts).await,
        SubCommand::Search(config) => config.run(&opts).await,
        SubCommand::Chat(config) => config.run(&opts).await,
        SubCommand::Inspect(config) => config.run(&opts).await,
        SubCommand::Export(config) => config.run(&opts).await,
    }
}
