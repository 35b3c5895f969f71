mod chat;
mod export;
mod ingest;
mod inspect;
mod search;

pub use chat::*;
pub use export::*;
pub use ingest::*;
pub use inspect::*;
pub use search::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}
