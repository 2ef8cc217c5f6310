//! Deterministic offline embedder based on feature hashing.
//!
//! Text contributes word and bigram features; images contribute hashed
//! byte-window features. Vectors are L2-normalised, so identical inputs map
//! to identical vectors and score a cosine of 1.0 against each other.

use sha2::{Digest, Sha256};

use super::{EmbedInput, Embedder, InputType};
use crate::error::Result;

pub const LOCAL_MODEL_ID: &str = "local-hash-v1";
pub const DEFAULT_LOCAL_DIM: usize = 384;

const IMAGE_WINDOW_BYTES: usize = 64;
const IMAGE_FEATURE_WEIGHT: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct LocalHashEmbedder {
    dimensions: usize,
}

impl LocalHashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(8),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_one(&self, input: &EmbedInput) -> Vec<f32> {
        let mut vector = vec![0_f32; self.dimensions];

        for token in tokenize(input.text()) {
            accumulate(&mut vector, stable_hash(token.as_bytes()), 1.0);
        }

        if let EmbedInput::TextImage { png, .. } = input {
            for window in png.chunks(IMAGE_WINDOW_BYTES) {
                accumulate(&mut vector, stable_hash(window), IMAGE_FEATURE_WEIGHT);
            }
        }

        normalize_vector(&mut vector);
        vector
    }
}

impl Default for LocalHashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_DIM)
    }
}

impl Embedder for LocalHashEmbedder {
    // Symmetric: both input types share one feature space.
    fn embed(&self, inputs: &[EmbedInput], _input_type: InputType) -> Result<Vec<Vec<f32>>> {
        Ok(inputs.iter().map(|input| self.embed_one(input)).collect())
    }

    fn model(&self) -> &str {
        LOCAL_MODEL_ID
    }
}

fn accumulate(vector: &mut [f32], hash: u64, scale: f32) {
    let dims = vector.len();
    let index = (hash as usize) % dims;
    let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
    let weight = 1.0 + (((hash >> 48) & 0xFF) as f32 / 255.0);
    vector[index] += sign * weight * scale;
}

// Sha256-derived so vectors stay stable across builds and platforms.
fn stable_hash(value: &[u8]) -> u64 {
    let digest = Sha256::digest(value);
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

fn tokenize(text: &str) -> Vec<String> {
    let words = text
        .split_whitespace()
        .map(|value| {
            value
                .chars()
                .filter(|character| character.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|value| !value.is_empty())
        .collect::<Vec<String>>();

    let mut features = Vec::<String>::with_capacity(words.len() * 2);
    for (index, word) in words.iter().enumerate() {
        features.push(format!("w:{word}"));
        if let Some(next) = words.get(index + 1) {
            features.push(format!("b:{word}_{next}"));
        }
    }
    features
}

fn normalize_vector(values: &mut [f32]) {
    let squared_norm = values
        .iter()
        .map(|value| f64::from(*value) * f64::from(*value))
        .sum::<f64>();

    if squared_norm <= 0.0 {
        return;
    }

    let norm = squared_norm.sqrt() as f32;
    for value in values {
        *value /= norm;
    }
}
