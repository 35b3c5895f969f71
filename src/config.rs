use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::classify::{SCORE_SCALE, check_score_scale};
use crate::cli::*;
use crate::encoder::{Embedder, ImageEncoder, ThumbnailEncoder};

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let path = ProjectDirs::from("", "defsearch", "defsearch")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".defsearch"));
    ConfDir { path }
});

static CONF_DIR_STR: LazyLock<String> = LazyLock::new(|| CONF_DIR.to_string());

fn default_config_dir() -> &'static str {
    CONF_DIR_STR.as_str()
}

#[derive(Parser, Debug, Clone)]
pub struct TileOptions {
    /// Side length of a tile in pixels
    #[arg(long, value_name = "PIXELS", default_value_t = 518, value_parser = clap::value_parser!(u32).range(1..))]
    pub tile_size: u32,
    /// Step between neighboring tiles; smaller than the tile size means overlap
    #[arg(long, value_name = "PIXELS", default_value_t = 259, value_parser = clap::value_parser!(u32).range(1..))]
    pub stride: u32,
}

#[derive(Parser, Debug, Clone)]
pub struct EncoderOptions {
    /// Embedding model
    #[arg(long, value_enum, default_value_t = EncoderKind::Thumbnail)]
    pub encoder: EncoderKind,
    /// ONNX model file, required by `--encoder onnx`
    #[arg(long, value_name = "FILE")]
    pub model: Option<PathBuf>,
    /// Output dimension of the ONNX model (1024 for ViT-L/14)
    #[arg(long, value_name = "D", default_value_t = 1024)]
    pub dimension: usize,
    /// Resolution tiles are resized to before encoding
    #[arg(long, value_name = "PIXELS", default_value_t = 518, value_parser = clap::value_parser!(u32).range(1..))]
    pub input_size: u32,
    /// Cells per side for the thumbnail encoder
    #[arg(long, value_name = "N", default_value_t = 8)]
    pub thumbnail_grid: usize,
}

impl EncoderOptions {
    pub fn build(&self) -> Result<Embedder<Box<dyn ImageEncoder>>> {
        let encoder: Box<dyn ImageEncoder> = match self.encoder {
            EncoderKind::Thumbnail => Box::new(ThumbnailEncoder::new(self.thumbnail_grid)),
            EncoderKind::Onnx => self.onnx()?,
        };
        Ok(Embedder::new(encoder, self.input_size))
    }

    #[cfg(feature = "onnx")]
    fn onnx(&self) -> Result<Box<dyn ImageEncoder>> {
        let model = self.model.as_ref().ok_or_else(|| anyhow!("--model is required"))?;
        Ok(Box::new(crate::encoder::OnnxEncoder::open(model, self.dimension)?))
    }

    #[cfg(not(feature = "onnx"))]
    fn onnx(&self) -> Result<Box<dyn ImageEncoder>> {
        Err(anyhow!("built without the `onnx` feature"))
    }
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// Neighbors retrieved per tile
    #[arg(short, value_name = "K", default_value_t = 5)]
    pub k: usize,
    /// Numerator of the distance to score transform
    #[arg(long, value_name = "SCALE", default_value_t = SCORE_SCALE, value_parser = parse_score_scale)]
    pub score_scale: f64,
    /// Output format
    #[arg(long, value_enum, value_name = "FORMAT", default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "defsearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// Configuration directory holding the flat index
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
    /// Vector store backend
    #[arg(short, long, value_enum, default_value_t = Backend::Flat)]
    pub backend: Backend,
    /// Postgres connection string for the pg backend
    #[arg(long, env = "DATABASE_URL", value_name = "URL")]
    pub database_url: Option<String>,
    /// Table used by the pg backend
    #[arg(long, default_value = "defect_images")]
    pub table: String,
}

impl Opts {
    pub fn database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| anyhow!("--database-url or DATABASE_URL is required for the pg backend"))
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// Add labelled images from `<root>/<defect_type>/` folders
    Ingest(IngestCommand),
    /// Classify one image
    Search(SearchCommand),
    /// Ask about images in a folder interactively
    Chat(ChatCommand),
    /// Show the size and first records of the store
    Inspect(InspectCommand),
    /// Write all flat-store vectors to a .npy file
    Export(ExportCommand),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// In-process index saved as an index/metadata file pair
    Flat,
    /// Postgres table with the pgvector extension
    Pg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderKind {
    /// Average-pooled color grid, needs no model
    Thumbnail,
    /// ONNX Runtime model
    Onnx,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Path of the flat index file
    pub fn index(&self) -> PathBuf {
        self.path.join("defect.index")
    }

    /// Path of the flat metadata file
    pub fn metadata(&self) -> PathBuf {
        self.path.join("defect.meta")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

impl std::fmt::Display for ConfDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

fn parse_score_scale(s: &str) -> Result<f64, String> {
    let scale = s.parse::<f64>().map_err(|e| format!("invalid score scale {}: {}", s, e))?;
    check_score_scale(scale).map_err(|e| e.to_string())
}
