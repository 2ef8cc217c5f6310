use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::chat::history::DEFAULT_HISTORY_LIMIT;
use crate::chat::openai::{DEFAULT_CHAT_MODEL, DEFAULT_OPENAI_BASE_URL};
use crate::embedding::cohere::{DEFAULT_COHERE_BASE_URL, DEFAULT_EMBED_MODEL};
use crate::embedding::local::DEFAULT_LOCAL_DIM;
use crate::embedding::pages::{DEFAULT_BATCH_SIZE, DEFAULT_WORKERS};

pub const DEFAULT_COLLECTION: &str = "pdf_pages";
pub const DEFAULT_PERSIST_DIR: &str = "./chroma_db";
pub const DEFAULT_TOP_K: usize = 5;

#[derive(Parser, Debug)]
#[command(
    name = "pageseek",
    version,
    about = "Page-window retrieval over rasterized PDF documents"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rasterize, embed and store every page of a PDF.
    Index(IndexArgs),
    /// Search a collection and print page windows per query.
    Query(QueryArgs),
    /// Write the page images of one page window.
    Fetch(FetchArgs),
    Status(StatusArgs),
    /// Interactive chat that can search the indexed pages.
    Chat(ChatArgs),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum Provider {
    Cohere,
    Local,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cohere => "cohere",
            Self::Local => "local",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    #[arg(long, default_value = DEFAULT_COLLECTION)]
    pub collection: String,

    #[arg(long, default_value = DEFAULT_PERSIST_DIR)]
    pub persist_dir: PathBuf,

    /// Keep the store in memory; nothing survives the process.
    #[arg(long, default_value_t = false, conflicts_with = "persist_dir")]
    pub in_memory: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RasterArgs {
    /// Render resolution. `fetch` and `chat` default to the resolution the
    /// collection was indexed at, everything else to 200.
    #[arg(long)]
    pub dpi: Option<u32>,

    #[arg(long, env = "PDFTOPPM", default_value = "pdftoppm")]
    pub pdftoppm: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct EmbedderArgs {
    #[arg(long, value_enum, default_value_t = Provider::Cohere)]
    pub provider: Provider,

    #[arg(long, default_value = DEFAULT_EMBED_MODEL)]
    pub model: String,

    #[arg(long, env = "COHERE_API_KEY", hide_env_values = true)]
    pub cohere_api_key: Option<String>,

    #[arg(long, env = "COHERE_BASE_URL", default_value = DEFAULT_COHERE_BASE_URL)]
    pub cohere_base_url: String,

    #[arg(long, default_value_t = DEFAULT_LOCAL_DIM)]
    pub local_dim: usize,

    #[arg(long, default_value_t = 120)]
    pub timeout_secs: u64,
}

#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    #[arg(long)]
    pub pdf: PathBuf,

    #[command(flatten)]
    pub raster: RasterArgs,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub embedder: EmbedderArgs,

    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Queries to run against the collection once indexing finished.
    #[arg(long = "query")]
    pub queries: Vec<String>,

    #[arg(long, default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,
}

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    #[arg(long = "query", required = true)]
    pub queries: Vec<String>,

    #[arg(long, default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub embedder: EmbedderArgs,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Centre page of the window (zero-based).
    #[arg(long)]
    pub page: u32,

    #[command(flatten)]
    pub raster: RasterArgs,

    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = DEFAULT_PERSIST_DIR)]
    pub persist_dir: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct ChatArgs {
    #[arg(long, default_value = DEFAULT_CHAT_MODEL)]
    pub chat_model: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL)]
    pub openai_base_url: String,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub embedder: EmbedderArgs,

    #[command(flatten)]
    pub raster: RasterArgs,

    #[arg(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
    pub history_limit: usize,

    #[arg(long, default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,

    /// Page images attached to the model per search.
    #[arg(long, default_value_t = 6)]
    pub max_context_pages: usize,

    /// Answer without offering the page search tool.
    #[arg(long, default_value_t = false)]
    pub no_tools: bool,
}
