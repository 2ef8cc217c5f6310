//! Embedding provider seam and the page/query embedding front end.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;

use crate::error::Result;

pub mod cohere;
pub mod local;
pub mod pages;

pub use cohere::CohereEmbedder;
pub use local::LocalHashEmbedder;
pub use pages::PageEmbedder;

/// Asymmetric embedding mode understood by retrieval-tuned models.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    SearchDocument,
    SearchQuery,
}

impl InputType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SearchDocument => "search_document",
            Self::SearchQuery => "search_query",
        }
    }
}

/// A single embedding input: text alone, or text plus a PNG image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedInput {
    Text(String),
    TextImage { text: String, png: Vec<u8> },
}

impl EmbedInput {
    pub fn text(&self) -> &str {
        match self {
            Self::Text(text) | Self::TextImage { text, .. } => text,
        }
    }
}

pub trait Embedder: Send + Sync {
    /// Returns exactly one vector per input, in input order.
    fn embed(&self, inputs: &[EmbedInput], input_type: InputType) -> Result<Vec<Vec<f32>>>;

    fn model(&self) -> &str;
}

/// `data:` URL carrying a base64 PNG payload.
pub fn png_data_url(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_data_url_encodes_payload() {
        assert_eq!(png_data_url(b"abc"), "data:image/png;base64,YWJj");
    }

    #[test]
    fn input_type_wire_names() {
        assert_eq!(InputType::SearchDocument.as_str(), "search_document");
        assert_eq!(
            serde_json::to_string(&InputType::SearchQuery).expect("json"),
            "\"search_query\""
        );
    }
}
