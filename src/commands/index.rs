use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::cli::IndexArgs;
use crate::commands::query::write_text_response;
use crate::config::IndexConfig;
use crate::embedding::PageEmbedder;
use crate::model::IndexRunManifest;
use crate::pipeline::{IndexReport, RetrievalPipeline};
use crate::rasterize::Rasterizer;
use crate::util::{now_utc_string, utc_compact_string, write_json_pretty};

pub fn run(args: IndexArgs) -> Result<()> {
    let config = IndexConfig::from_args(&args)?;
    let started_at = now_utc_string();

    let embedder = config.embedder.build()?;
    let store = config
        .store
        .open()
        .context("failed to open vector store")?;
    let rasterizer = config.raster.build(None);
    let pipeline = RetrievalPipeline::new(
        &rasterizer,
        PageEmbedder::new(embedder.as_ref(), config.batch_size, config.workers),
        &store,
    );

    info!(
        document = %config.document.display(),
        collection = %config.store.collection,
        dpi = rasterizer.dpi(),
        provider = config.embedder.provider.as_str(),
        model = %embedder.model(),
        "index requested"
    );
    let report = pipeline
        .index_document(&config.document, &config.store.collection)
        .with_context(|| format!("failed to index {}", config.document.display()))?;

    if let Some(persist_dir) = &config.store.persist_dir {
        let manifest = build_manifest(&config, &report, embedder.model(), rasterizer.dpi(), started_at);
        let manifest_path = persist_dir.join("manifests").join(format!(
            "index_run_{}.json",
            utc_compact_string(Utc::now())
        ));
        write_json_pretty(&manifest_path, &manifest)?;
        info!(path = %manifest_path.display(), "wrote index run manifest");
    }

    if !config.queries.is_empty() {
        let results = pipeline
            .search(&config.queries, &config.store.collection, config.top_k)
            .context("post-index query failed")?;
        write_text_response(&config.store.collection, &results)?;
    }

    Ok(())
}

fn build_manifest(
    config: &IndexConfig,
    report: &IndexReport,
    model: &str,
    dpi: u32,
    started_at: String,
) -> IndexRunManifest {
    IndexRunManifest {
        manifest_version: 1,
        run_id: Uuid::new_v4().to_string(),
        started_at,
        completed_at: now_utc_string(),
        status: "completed".to_string(),
        collection: report.collection.clone(),
        collection_created: report.collection_created,
        document_path: report.document_path.clone(),
        document_sha256: report.document_sha256.clone(),
        dpi,
        provider: config.embedder.provider.as_str().to_string(),
        model: model.to_string(),
        page_count: report.page_count,
        embedding_dim: report.embedding_dim,
        batch_size: config.batch_size,
        workers: config.workers,
        duration_ms: report.duration_ms,
    }
}
