//! Indexing and query orchestration over the rasterizer, the page embedder
//! and the vector store. Holds no state of its own.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::embedding::PageEmbedder;
use crate::error::{PipelineError, Result};
use crate::model::{CollectionInfo, Page};
use crate::rasterize::{Rasterizer, document_label};
use crate::store::VectorStore;
use crate::util::sha256_file;
use crate::window::{QueryWindows, contiguous_runs, merge_windows, pair_windows};


pub struct RetrievalPipeline<'a> {
    rasterizer: &'a dyn Rasterizer,
    embedder: PageEmbedder<'a>,
    store: &'a VectorStore,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub collection: String,
    pub collection_created: bool,
    pub document_path: String,
    pub document_sha256: String,
    pub page_count: usize,
    pub embedding_dim: usize,
    pub duration_ms: u128,
}

impl<'a> RetrievalPipeline<'a> {
    pub fn new(
        rasterizer: &'a dyn Rasterizer,
        embedder: PageEmbedder<'a>,
        store: &'a VectorStore,
    ) -> Self {
        Self {
            rasterizer,
            embedder,
            store,
        }
    }

    /// rasterize -> embed (document mode) -> upsert, ids `"0".."n-1"`.
    ///
    /// Nothing is written unless every page embedded successfully. Entries
    /// left over from a previously indexed, longer document are removed.
    pub fn index_document(&self, document: &Path, collection_name: &str) -> Result<IndexReport> {
        let started = Instant::now();
        let document_sha256 = hash_document(document)?;

        let pages = self.rasterizer.rasterize(document)?;
        if pages.is_empty() {
            return Err(PipelineError::source_unreadable(document, "document has no pages"));
        }
        let embeddings = self.embedder.embed_pages(&pages)?;

        let opened = self.store.get_or_create(collection_name)?;
        let collection_created = opened.was_created();
        let collection = opened.into_collection();

        let ids = embeddings
            .iter()
            .map(|embedding| embedding.page_index.to_string())
            .collect::<Vec<String>>();
        let vectors = embeddings
            .into_iter()
            .map(|embedding| embedding.vector)
            .collect::<Vec<Vec<f32>>>();
        let embedding_dim = vectors.first().map(Vec::len).unwrap_or_default();
        collection.replace_all(&ids, &vectors)?;

        let page_count = u32::try_from(pages.len()).unwrap_or(u32::MAX);
        collection.set_source(
            &absolute_path(document),
            &document_sha256,
            &document_label(document),
            page_count,
            self.rasterizer.dpi(),
        )?;

        let report = IndexReport {
            collection: collection.name().to_string(),
            collection_created,
            document_path: document.display().to_string(),
            document_sha256,
            page_count: pages.len(),
            embedding_dim,
            duration_ms: started.elapsed().as_millis(),
        };
        info!(
            collection = %report.collection,
            model = %self.embedder.model(),
            created = report.collection_created,
            pages = report.page_count,
            embedding_dim = report.embedding_dim,
            duration_ms = report.duration_ms as u64,
            "document indexed"
        );
        Ok(report)
    }

    /// embed (query mode) -> nearest ids -> page windows, paired per query.
    pub fn search(
        &self,
        queries: &[String],
        collection_name: &str,
        top_k: usize,
    ) -> Result<Vec<QueryWindows>> {
        let collection = self.store.get(collection_name)?;
        let info = collection.info()?;
        let Some(max_page) = info.max_page() else {
            warn!(collection = %info.name, "collection is empty; nothing to search");
            return Ok(queries
                .iter()
                .map(|query| QueryWindows {
                    query: query.clone(),
                    ids: Vec::new(),
                    windows: Vec::new(),
                })
                .collect());
        };

        let vectors = self.embedder.embed_queries(queries)?;
        let results = collection.query(&vectors, top_k)?;
        let paired = pair_windows(queries, results, 0, max_page)?;

        info!(
            collection = %info.name,
            queries = queries.len(),
            top_k,
            max_page,
            "search completed"
        );
        Ok(paired)
    }

    /// Page images for the given page indices, re-rendered from the document
    /// recorded for the collection.
    pub fn fetch_pages(&self, collection_name: &str, pages: &[u32]) -> Result<Vec<Page>> {
        render_pages(self.rasterizer, self.store, collection_name, pages)
    }

    /// [`search`](Self::search) followed by [`fetch_pages`](Self::fetch_pages)
    /// over the union of every window, capped at `max_pages`.
    pub fn search_with_pages(
        &self,
        queries: &[String],
        collection_name: &str,
        top_k: usize,
        max_pages: usize,
    ) -> Result<(Vec<QueryWindows>, Vec<Page>)> {
        let paired = self.search(queries, collection_name, top_k)?;

        // Walk results nearest-first so the cap keeps the best context.
        let mut wanted = Vec::<u32>::new();
        let longest = paired.iter().map(|entry| entry.windows.len()).max().unwrap_or(0);
        for rank in 0..longest {
            for entry in &paired {
                let Some(window) = entry.windows.get(rank) else {
                    continue;
                };
                for page in window {
                    if wanted.len() < max_pages && !wanted.contains(page) {
                        wanted.push(*page);
                    }
                }
            }
        }

        let pages = self.fetch_pages(collection_name, &wanted)?;
        Ok((paired, pages))
    }
}

/// Re-rasterizes `pages` (any order, duplicates allowed) from the source
/// document of a collection, one render per run of consecutive pages.
/// Returns them sorted and deduplicated.
pub fn render_pages(
    rasterizer: &dyn Rasterizer,
    store: &VectorStore,
    collection_name: &str,
    pages: &[u32],
) -> Result<Vec<Page>> {
    let wanted = merge_windows(&[pages.to_vec()]);
    let (Some(first), Some(last)) = (wanted.first().copied(), wanted.last().copied()) else {
        return Ok(Vec::new());
    };

    let info = store.get(collection_name)?.info()?;
    let source = source_document(&info)?;
    if let Some(expected) = info.source_sha256.as_deref() {
        let current = hash_document(&source)?;
        if current != expected {
            warn!(
                collection = %info.name,
                document = %source.display(),
                "source document changed since indexing"
            );
        }
    }

    let runs = contiguous_runs(&wanted);
    let mut fetched = Vec::with_capacity(wanted.len());
    for &(run_first, run_last) in &runs {
        let mut rendered = rasterizer.rasterize_range(&source, run_first, run_last)?;
        rendered.retain(|page| wanted.binary_search(&page.index).is_ok());
        fetched.extend(rendered);
    }
    debug!(
        collection = %info.name,
        first,
        last,
        runs = runs.len(),
        pages = fetched.len(),
        "pages rendered"
    );
    Ok(fetched)
}

fn hash_document(document: &Path) -> Result<String> {
    sha256_file(document).map_err(|err| PipelineError::source_unreadable(document, format!("{err:#}")))
}

fn source_document(info: &CollectionInfo) -> Result<PathBuf> {
    info.source_path
        .as_deref()
        .map(PathBuf::from)
        .ok_or_else(|| {
            PipelineError::CollectionUnavailable(format!(
                "collection '{}' has no source document recorded",
                info.name
            ))
        })
}

fn absolute_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
