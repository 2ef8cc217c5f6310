//! Per-invocation configuration resolved from command-line arguments and the
//! environment. Built once in each command and passed down by value.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, ensure};
use tracing::debug;

use crate::chat::OpenAiChat;
use crate::cli::{
    ChatArgs, EmbedderArgs, IndexArgs, Provider, QueryArgs, RasterArgs, StoreArgs,
};
use crate::embedding::{CohereEmbedder, Embedder, LocalHashEmbedder};
use crate::error::PipelineError;
use crate::rasterize::{DEFAULT_DPI, PdftoppmRasterizer};
use crate::store::VectorStore;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub collection: String,
    /// `None` keeps the store in memory.
    pub persist_dir: Option<PathBuf>,
}

impl StoreConfig {
    pub fn from_args(args: &StoreArgs) -> Result<Self> {
        ensure!(
            !args.collection.trim().is_empty(),
            "collection name must not be empty"
        );
        Ok(Self {
            collection: args.collection.trim().to_string(),
            persist_dir: (!args.in_memory).then(|| args.persist_dir.clone()),
        })
    }

    pub fn open(&self) -> std::result::Result<VectorStore, PipelineError> {
        VectorStore::open(self.persist_dir.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct RasterConfig {
    /// Explicit `--dpi`; `None` defers to the collection or the default.
    pub dpi: Option<u32>,
    pub program: PathBuf,
}

impl RasterConfig {
    pub fn from_args(args: &RasterArgs) -> Result<Self> {
        ensure!(args.dpi != Some(0), "--dpi must be positive");
        Ok(Self {
            dpi: args.dpi,
            program: args.pdftoppm.clone(),
        })
    }

    /// An explicit flag wins over the resolution recorded at index time.
    pub fn resolve_dpi(&self, recorded: Option<u32>) -> u32 {
        self.dpi
            .or(recorded.filter(|dpi| *dpi > 0))
            .unwrap_or(DEFAULT_DPI)
    }

    pub fn build(&self, recorded: Option<u32>) -> PdftoppmRasterizer {
        PdftoppmRasterizer::new(self.resolve_dpi(recorded)).with_program(&self.program)
    }
}

#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    pub provider: Provider,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: String,
    pub local_dim: usize,
    pub timeout: Duration,
}

impl EmbedderConfig {
    pub fn from_args(args: &EmbedderArgs) -> Result<Self> {
        ensure!(args.timeout_secs > 0, "--timeout-secs must be positive");
        Ok(Self {
            provider: args.provider,
            model: args.model.trim().to_string(),
            api_key: args.cohere_api_key.clone(),
            base_url: args.cohere_base_url.clone(),
            local_dim: args.local_dim,
            timeout: Duration::from_secs(args.timeout_secs),
        })
    }

    /// Fails with [`PipelineError::MissingCredential`] before any network
    /// call when the provider needs a key that is not set.
    pub fn build(&self) -> std::result::Result<Box<dyn Embedder>, PipelineError> {
        match self.provider {
            Provider::Cohere => {
                let api_key = resolve_credential(self.api_key.as_deref(), "COHERE_API_KEY")?;
                Ok(Box::new(CohereEmbedder::new(
                    &api_key,
                    &self.base_url,
                    self.model.clone(),
                    self.timeout,
                )?))
            }
            Provider::Local => {
                let embedder = LocalHashEmbedder::new(self.local_dim);
                debug!(dimensions = embedder.dimensions(), "using local hash embedder");
                Ok(Box::new(embedder))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub document: PathBuf,
    pub raster: RasterConfig,
    pub store: StoreConfig,
    pub embedder: EmbedderConfig,
    pub batch_size: usize,
    pub workers: usize,
    pub queries: Vec<String>,
    pub top_k: usize,
}

impl IndexConfig {
    pub fn from_args(args: &IndexArgs) -> Result<Self> {
        ensure!(args.batch_size > 0, "--batch-size must be positive");
        ensure!(args.workers > 0, "--workers must be positive");
        ensure!(args.top_k > 0, "--top-k must be positive");
        Ok(Self {
            document: args.pdf.clone(),
            raster: RasterConfig::from_args(&args.raster)?,
            store: StoreConfig::from_args(&args.store)?,
            embedder: EmbedderConfig::from_args(&args.embedder)?,
            batch_size: args.batch_size,
            workers: args.workers,
            queries: clean_queries(&args.queries),
            top_k: args.top_k,
        })
    }
}

#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub queries: Vec<String>,
    pub top_k: usize,
    pub store: StoreConfig,
    pub embedder: EmbedderConfig,
    pub json: bool,
}

impl QueryConfig {
    pub fn from_args(args: &QueryArgs) -> Result<Self> {
        let queries = clean_queries(&args.queries);
        ensure!(!queries.is_empty(), "at least one non-empty --query is required");
        ensure!(args.top_k > 0, "--top-k must be positive");
        Ok(Self {
            queries,
            top_k: args.top_k,
            store: StoreConfig::from_args(&args.store)?,
            embedder: EmbedderConfig::from_args(&args.embedder)?,
            json: args.json,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: String,
    pub store: StoreConfig,
    pub embedder: EmbedderConfig,
    pub raster: RasterConfig,
    pub history_limit: usize,
    pub top_k: usize,
    pub max_context_pages: usize,
    pub tools_enabled: bool,
    pub timeout: Duration,
}

impl ChatConfig {
    pub fn from_args(args: &ChatArgs) -> Result<Self> {
        ensure!(args.history_limit > 0, "--history-limit must be positive");
        ensure!(args.top_k > 0, "--top-k must be positive");
        let embedder = EmbedderConfig::from_args(&args.embedder)?;
        Ok(Self {
            model: args.chat_model.trim().to_string(),
            api_key: args.openai_api_key.clone(),
            base_url: args.openai_base_url.clone(),
            store: StoreConfig::from_args(&args.store)?,
            timeout: embedder.timeout,
            embedder,
            raster: RasterConfig::from_args(&args.raster)?,
            history_limit: args.history_limit,
            top_k: args.top_k,
            max_context_pages: args.max_context_pages,
            tools_enabled: !args.no_tools,
        })
    }

    pub fn build_chat(&self) -> std::result::Result<OpenAiChat, PipelineError> {
        let api_key = resolve_credential(self.api_key.as_deref(), "OPENAI_API_KEY")?;
        OpenAiChat::new(&api_key, &self.base_url, self.model.clone(), self.timeout)
    }
}

fn resolve_credential(
    value: Option<&str>,
    name: &'static str,
) -> std::result::Result<String, PipelineError> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or(PipelineError::MissingCredential(name))
}

fn clean_queries(queries: &[String]) -> Vec<String> {
    queries
        .iter()
        .map(|query| query.trim())
        .filter(|query| !query.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::{Cli, Commands};
    use crate::rasterize::Rasterizer;

    fn parse(args: &[&str]) -> Commands {
        Cli::try_parse_from(args).expect("parse").command
    }

    fn embedder_args(provider: Provider, key: Option<&str>) -> EmbedderArgs {
        EmbedderArgs {
            provider,
            model: "embed-v4.0".to_string(),
            cohere_api_key: key.map(str::to_string),
            cohere_base_url: "http://localhost:1".to_string(),
            local_dim: 32,
            timeout_secs: 5,
        }
    }

    #[test]
    fn index_defaults_follow_the_cli() {
        let Commands::Index(args) = parse(&["pageseek", "index", "--pdf", "book.pdf"]) else {
            panic!("expected index command");
        };
        let config = IndexConfig::from_args(&args).expect("config");
        assert_eq!(config.raster.dpi, None);
        assert_eq!(config.raster.resolve_dpi(None), 200);
        assert_eq!(config.raster.program, PathBuf::from("pdftoppm"));
        assert_eq!(config.store.collection, "pdf_pages");
        assert_eq!(config.store.persist_dir, Some(PathBuf::from("./chroma_db")));
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.workers, 4);
        assert!(config.queries.is_empty());
    }

    #[test]
    fn zero_dpi_is_rejected() {
        let Commands::Index(args) = parse(&["pageseek", "index", "--pdf", "a.pdf", "--dpi", "0"])
        else {
            panic!("expected index command");
        };
        assert!(IndexConfig::from_args(&args).is_err());
    }

    #[test]
    fn recorded_dpi_is_the_default_for_rerendering() {
        let Commands::Fetch(args) = parse(&["pageseek", "fetch", "--page", "3"]) else {
            panic!("expected fetch command");
        };
        let raster = RasterConfig::from_args(&args.raster).expect("config");
        assert_eq!(raster.resolve_dpi(Some(150)), 150);
        assert_eq!(raster.build(Some(150)).dpi(), 150);

        let Commands::Fetch(args) = parse(&["pageseek", "fetch", "--page", "3", "--dpi", "300"])
        else {
            panic!("expected fetch command");
        };
        let raster = RasterConfig::from_args(&args.raster).expect("config");
        assert_eq!(raster.resolve_dpi(Some(150)), 300);
    }

    #[test]
    fn blank_queries_are_dropped() {
        let Commands::Query(args) = parse(&[
            "pageseek", "query", "--query", "  ", "--query", "flood maps", "--in-memory",
        ]) else {
            panic!("expected query command");
        };
        let config = QueryConfig::from_args(&args).expect("config");
        assert_eq!(config.queries, vec!["flood maps".to_string()]);
        assert_eq!(config.store.persist_dir, None);
    }

    #[test]
    fn cohere_without_key_is_a_missing_credential() {
        let config = EmbedderConfig::from_args(&embedder_args(Provider::Cohere, Some("  ")))
            .expect("config");
        let err = config.build().err().expect("missing key");
        assert!(matches!(err, PipelineError::MissingCredential("COHERE_API_KEY")));
    }

    #[test]
    fn local_provider_needs_no_key() {
        let config =
            EmbedderConfig::from_args(&embedder_args(Provider::Local, None)).expect("config");
        let embedder = config.build().expect("local embedder");
        assert_eq!(embedder.model(), crate::embedding::local::LOCAL_MODEL_ID);
    }
}
