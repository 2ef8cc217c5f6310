use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use tracing::{debug, info, warn};

use super::{EmbedInput, Embedder, InputType};
use crate::error::{PipelineError, Result};
use crate::model::{Page, PageEmbedding};

pub const DEFAULT_BATCH_SIZE: usize = 1;
pub const DEFAULT_WORKERS: usize = 4;

/// Embeds rasterized pages and plain-text queries through an [`Embedder`].
///
/// Pages are grouped into batches of `batch_size` and spread over a fixed
/// pool of `workers` threads. Output order always matches input order, and a
/// single failed batch fails the whole call.
pub struct PageEmbedder<'a> {
    embedder: &'a dyn Embedder,
    batch_size: usize,
    workers: usize,
}

struct BatchTask<'p> {
    id: usize,
    pages: &'p [Page],
}

struct BatchOutput {
    id: usize,
    vectors: Vec<Vec<f32>>,
}

type BatchResult = Result<BatchOutput>;

impl<'a> PageEmbedder<'a> {
    pub fn new(embedder: &'a dyn Embedder, batch_size: usize, workers: usize) -> Self {
        Self {
            embedder,
            batch_size: batch_size.max(1),
            workers: workers.max(1),
        }
    }

    pub fn model(&self) -> &str {
        self.embedder.model()
    }

    pub fn embed_pages(&self, pages: &[Page]) -> Result<Vec<PageEmbedding>> {
        if pages.is_empty() {
            return Ok(Vec::new());
        }

        let batches = pages.chunks(self.batch_size).collect::<Vec<&[Page]>>();
        let workers = self.workers.min(batches.len());
        info!(
            model = %self.embedder.model(),
            pages = pages.len(),
            batches = batches.len(),
            workers,
            "embedding pages"
        );

        let (task_tx, task_rx) = bounded::<BatchTask<'_>>(workers * 2);
        let (result_tx, result_rx) = unbounded::<BatchResult>();
        let failed = AtomicBool::new(false);

        let mut completed = BTreeMap::<usize, Vec<Vec<f32>>>::new();
        let mut first_error: Option<PipelineError> = None;

        thread::scope(|scope| {
            for worker_id in 0..workers {
                let receiver = task_rx.clone();
                let sender = result_tx.clone();
                let embedder = self.embedder;
                let failed = &failed;
                scope.spawn(move || worker_loop(worker_id, embedder, receiver, sender, failed));
            }
            drop(task_rx);
            drop(result_tx);

            let batches = &batches;
            scope.spawn(move || {
                for (id, pages) in batches.iter().enumerate() {
                    if task_tx.send(BatchTask { id, pages }).is_err() {
                        break;
                    }
                }
            });

            for result in result_rx.iter() {
                match result {
                    Ok(output) => {
                        completed.insert(output.id, output.vectors);
                    }
                    Err(err) => {
                        failed.store(true, Ordering::SeqCst);
                        if first_error.is_none() {
                            first_error = Some(err);
                        }
                    }
                }
            }
        });

        if let Some(err) = first_error {
            warn!(error = %err, "page embedding aborted; no vectors kept");
            return Err(err);
        }

        let mut vectors = completed.into_values().flatten();
        let mut out = Vec::with_capacity(pages.len());
        for page in pages {
            let vector = vectors.next().ok_or_else(|| {
                PipelineError::EmbeddingProviderError(format!(
                    "no embedding produced for page {}",
                    page.index
                ))
            })?;
            out.push(PageEmbedding {
                page_index: page.index,
                vector,
            });
        }

        Ok(out)
    }

    /// Text-only query embeddings, one per query, in query order.
    pub fn embed_queries(&self, queries: &[String]) -> Result<Vec<Vec<f32>>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let inputs = queries
            .iter()
            .map(|query| EmbedInput::Text(query.clone()))
            .collect::<Vec<EmbedInput>>();
        let vectors = self.embedder.embed(&inputs, InputType::SearchQuery)?;
        ensure_vector_count(vectors.len(), inputs.len())?;
        Ok(vectors)
    }
}

fn worker_loop(
    worker_id: usize,
    embedder: &dyn Embedder,
    receiver: Receiver<BatchTask<'_>>,
    sender: Sender<BatchResult>,
    failed: &AtomicBool,
) {
    for task in receiver.iter() {
        // Drain remaining work without calling the provider once a batch failed.
        if failed.load(Ordering::SeqCst) {
            continue;
        }

        debug!(worker_id, batch_id = task.id, pages = task.pages.len(), "embedding batch");
        let result = embed_batch(embedder, task.pages).map(|vectors| BatchOutput {
            id: task.id,
            vectors,
        });
        if sender.send(result).is_err() {
            break;
        }
    }
}

fn embed_batch(embedder: &dyn Embedder, pages: &[Page]) -> Result<Vec<Vec<f32>>> {
    let inputs = pages
        .iter()
        .map(|page| EmbedInput::TextImage {
            text: page.label.clone(),
            png: page.image.clone(),
        })
        .collect::<Vec<EmbedInput>>();

    let vectors = embedder.embed(&inputs, InputType::SearchDocument)?;
    ensure_vector_count(vectors.len(), inputs.len())?;
    Ok(vectors)
}

fn ensure_vector_count(actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(PipelineError::EmbeddingProviderError(format!(
            "provider returned {actual} embeddings for {expected} inputs"
        )));
    }
    Ok(())
}
