use crate::llm::openai::OpenAiConfig;
use crate::llm::LlmError;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Characters of document content sent for embedding.
pub const MAX_EMBEDDING_CHARS: usize = 8000;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Generate embeddings for a list of texts using the OpenAI-compatible API
pub async fn generate_embeddings(
    config: &OpenAiConfig,
    texts: &[String],
    model: &str,
) -> Result<Vec<Vec<f32>>, LlmError> {
    let client = Client::new();
    let body = EmbeddingRequest { model, input: texts };

    let resp = client
        .post(format!("{}/embeddings", config.base_url.trim_end_matches('/')))
        .bearer_auth(&config.api_key)
        .json(&body)
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let message = resp.text().await.unwrap_or_default();
        return Err(LlmError::Api { status, message });
    }

    let data: EmbeddingResponse = resp.json().await?;
    Ok(data.data.into_iter().map(|d| d.embedding).collect())
}

/// Embed one piece of text, truncated to [`MAX_EMBEDDING_CHARS`].
pub async fn embed_text(config: &OpenAiConfig, text: &str) -> Result<Vec<f32>, LlmError> {
    let truncated: String = text.chars().take(MAX_EMBEDDING_CHARS).collect();
    generate_embeddings(config, &[truncated], EMBEDDING_MODEL)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Parse("embedding response contained no vectors".into()))
}

/// Cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Rank candidates by similarity to the query, dropping those below `threshold`.
pub fn search_similar(
    query_embedding: &[f32],
    candidates: &[(String, Vec<f32>)], // (document_id, embedding)
    top_k: usize,
    threshold: f32,
) -> Vec<(String, f32)> {
    let mut scored: Vec<(String, f32)> = candidates
        .iter()
        .map(|(id, emb)| (id.clone(), cosine_similarity(query_embedding, emb)))
        .filter(|(_, score)| *score >= threshold)
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);
    scored
}

/// Serialize embedding to bytes for SQLite BLOB storage
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize embedding from SQLite BLOB bytes
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
