use serde::{Deserialize, Serialize};

/// One rasterized document page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub index: u32,
    /// PNG-encoded page image.
    pub image: Vec<u8>,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageEmbedding {
    pub page_index: u32,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub dimension: Option<usize>,
    pub source_path: Option<String>,
    pub source_sha256: Option<String>,
    pub label: Option<String>,
    pub page_count: Option<u32>,
    /// Resolution the pages were rendered at for embedding.
    pub dpi: Option<u32>,
    pub entry_count: usize,
    pub created_at: String,
    pub updated_at: String,
}

impl CollectionInfo {
    /// Highest page index of the indexed document, falling back to the
    /// number of stored entries when no source has been recorded.
    pub fn max_page(&self) -> Option<u32> {
        let count = self
            .page_count
            .or_else(|| u32::try_from(self.entry_count).ok())?;
        count.checked_sub(1)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub started_at: String,
    pub completed_at: String,
    pub status: String,
    pub collection: String,
    pub collection_created: bool,
    pub document_path: String,
    pub document_sha256: String,
    pub dpi: u32,
    pub provider: String,
    pub model: String,
    pub page_count: usize,
    pub embedding_dim: usize,
    pub batch_size: usize,
    pub workers: usize,
    pub duration_ms: u128,
}
