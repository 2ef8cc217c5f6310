//! Cohere v2 embed client (multimodal, asymmetric input types).

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{EmbedInput, Embedder, InputType, png_data_url};
use crate::error::{PipelineError, Result};

pub const DEFAULT_COHERE_BASE_URL: &str = "https://api.cohere.com";
pub const DEFAULT_EMBED_MODEL: &str = "embed-v4.0";

/// Blocking embeddings client for Cohere's `/v2/embed` endpoint.
#[derive(Clone)]
pub struct CohereEmbedder {
    client: Client,
    endpoint: String,
    model: String,
}

impl CohereEmbedder {
    pub fn new(api_key: &str, base_url: &str, model: String, timeout: Duration) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(PipelineError::MissingCredential("COHERE_API_KEY"));
        }
        if model.trim().is_empty() {
            return Err(PipelineError::EmbeddingProviderError(
                "missing embedding model name".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).map_err(|_| {
                PipelineError::EmbeddingProviderError("invalid Cohere API key".to_string())
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| {
                PipelineError::EmbeddingProviderError(format!(
                    "failed to build Cohere HTTP client: {err}"
                ))
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/v2/embed", base_url.trim_end_matches('/')),
            model,
        })
    }
}

impl Embedder for CohereEmbedder {
    fn embed(&self, inputs: &[EmbedInput], input_type: InputType) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbedRequest::build(&self.model, inputs, input_type);
        debug!(model = %self.model, inputs = inputs.len(), input_type = input_type.as_str(), "sending embed request");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(|err| {
                PipelineError::EmbeddingProviderError(format!("Cohere embed request failed: {err}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(PipelineError::EmbeddingProviderError(format!(
                "Cohere embed request failed ({status}): {body}"
            )));
        }

        let parsed: EmbedResponse = response.json().map_err(|err| {
            PipelineError::EmbeddingProviderError(format!(
                "failed to parse Cohere embed response: {err}"
            ))
        })?;
        parsed.into_vectors(inputs.len())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input_type: InputType,
    embedding_types: [&'static str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    texts: Option<Vec<&'a str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inputs: Option<Vec<MultimodalInput<'a>>>,
}

impl<'a> EmbedRequest<'a> {
    /// Text-only batches use the `texts` field; anything with an image goes
    /// through `inputs` content parts.
    fn build(model: &'a str, inputs: &'a [EmbedInput], input_type: InputType) -> Self {
        let text_only = inputs
            .iter()
            .all(|input| matches!(input, EmbedInput::Text(_)));

        let (texts, multimodal) = if text_only {
            (Some(inputs.iter().map(EmbedInput::text).collect()), None)
        } else {
            (None, Some(inputs.iter().map(MultimodalInput::from).collect()))
        };

        Self {
            model,
            input_type,
            embedding_types: ["float"],
            texts,
            inputs: multimodal,
        }
    }
}

#[derive(Debug, Serialize)]
struct MultimodalInput<'a> {
    content: Vec<ContentPart<'a>>,
}

impl<'a> From<&'a EmbedInput> for MultimodalInput<'a> {
    fn from(input: &'a EmbedInput) -> Self {
        let mut content = vec![ContentPart::Text {
            text: input.text(),
        }];
        if let EmbedInput::TextImage { png, .. } = input {
            content.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: png_data_url(png),
                },
            });
        }
        Self { content }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: EmbeddingsByType,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsByType {
    #[serde(default)]
    float: Vec<Vec<f32>>,
}

impl EmbedResponse {
    fn into_vectors(self, expected_len: usize) -> Result<Vec<Vec<f32>>> {
        let vectors = self.embeddings.float;
        if vectors.len() != expected_len {
            return Err(PipelineError::EmbeddingProviderError(format!(
                "Cohere returned {} embeddings for {} inputs",
                vectors.len(),
                expected_len
            )));
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn text_queries_are_sent_as_texts() {
        let inputs = vec![
            EmbedInput::Text("fluss".to_string()),
            EmbedInput::Text("impressum".to_string()),
        ];
        let request = EmbedRequest::build("embed-v4.0", &inputs, InputType::SearchQuery);

        assert_eq!(
            serde_json::to_value(&request).expect("json"),
            json!({
                "model": "embed-v4.0",
                "input_type": "search_query",
                "embedding_types": ["float"],
                "texts": ["fluss", "impressum"],
            })
        );
    }

    #[test]
    fn page_inputs_carry_label_and_image_parts() {
        let inputs = vec![EmbedInput::TextImage {
            text: "strom.pdf".to_string(),
            png: b"abc".to_vec(),
        }];
        let request = EmbedRequest::build("embed-v4.0", &inputs, InputType::SearchDocument);

        assert_eq!(
            serde_json::to_value(&request).expect("json"),
            json!({
                "model": "embed-v4.0",
                "input_type": "search_document",
                "embedding_types": ["float"],
                "inputs": [{
                    "content": [
                        {"type": "text", "text": "strom.pdf"},
                        {"type": "image_url", "image_url": {"url": "data:image/png;base64,YWJj"}},
                    ]
                }],
            })
        );
    }

    #[test]
    fn response_length_must_match_inputs() {
        let response: EmbedResponse = serde_json::from_value(json!({
            "id": "abc",
            "embeddings": {"float": [[0.1, 0.2]]},
        }))
        .expect("parse");

        let err = response.into_vectors(2).expect_err("short response");
        assert!(matches!(err, PipelineError::EmbeddingProviderError(_)));
    }

    #[test]
    fn empty_api_key_is_a_missing_credential() {
        let err = CohereEmbedder::new(
            "  ",
            DEFAULT_COHERE_BASE_URL,
            DEFAULT_EMBED_MODEL.to_string(),
            Duration::from_secs(5),
        )
        .err()
        .expect("missing key");
        assert!(matches!(err, PipelineError::MissingCredential("COHERE_API_KEY")));
    }
}
