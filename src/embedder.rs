//! Embedding provider interface, batching, and the HTTP client.
//!
//! The pipeline talks to providers through [`EmbeddingProvider`];
//! [`HttpEmbedder`] is the production implementation for OpenAI-compatible
//! `/embeddings` endpoints. Texts are embedded with E5-style task prefixes:
//! `passage: ` at ingestion time, `query: ` at search time. Prefixing
//! happens here so batch boundaries can never influence the output.

use std::{collections::VecDeque, thread, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const PASSAGE_PREFIX: &str = "passage: ";
pub const QUERY_PREFIX: &str = "query: ";

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// Narrow capability the pipeline needs from an embedding model.
pub trait EmbeddingProvider {
    /// Identifier recorded into each chunk's metadata.
    fn model_id(&self) -> &str;

    /// Embed a batch of texts. The i-th output vector corresponds to the
    /// i-th input text.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed passage texts, applying the passage prefix and validating that the
/// provider honored input order and count.
pub fn embed_passages(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let prefixed: Vec<String> = texts
        .iter()
        .map(|t| format!("{PASSAGE_PREFIX}{t}"))
        .collect();
    let vectors = provider.embed(&prefixed)?;
    if vectors.len() != texts.len() {
        return Err(Error::Provider(format!(
            "provider returned {} vectors for {} inputs",
            vectors.len(),
            texts.len()
        )));
    }
    Ok(vectors)
}

/// Embed a search query with the query prefix.
pub fn embed_query(
    provider: &dyn EmbeddingProvider,
    query: &str,
) -> Result<Vec<f32>> {
    let mut vectors = provider.embed(&[format!("{QUERY_PREFIX}{query}")])?;
    vectors
        .pop()
        .ok_or_else(|| Error::Provider("provider returned no vector".into()))
}

/// Order-preserving accumulator that releases items in fixed-size batches.
///
/// Batching exists purely for provider throughput; items may span multiple
/// documents.
#[derive(Debug)]
pub struct BatchQueue<T> {
    batch_size: usize,
    items: VecDeque<T>,
}

impl<T> BatchQueue<T> {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            items: VecDeque::new(),
        }
    }

    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drain one full batch, or `None` while fewer than `batch_size` items
    /// are queued.
    pub fn take_full(&mut self) -> Option<Vec<T>> {
        if self.items.len() < self.batch_size {
            return None;
        }
        Some(self.items.drain(..self.batch_size).collect())
    }

    /// Drain whatever is left as a final, possibly short batch.
    pub fn take_remaining(&mut self) -> Option<Vec<T>> {
        if self.items.is_empty() {
            return None;
        }
        Some(self.items.drain(..).collect())
    }
}

/// Blocking embeddings client for OpenAI-compatible endpoints.
///
/// Failures are retried a bounded number of times with exponential backoff;
/// timeouts and 429/5xx responses count as retryable.
pub struct HttpEmbedder {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    max_retries: usize,
}

impl HttpEmbedder {
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        model: &str,
        timeout: Duration,
        max_retries: usize,
    ) -> Result<Self> {
        if model.trim().is_empty() {
            return Err(Error::Config("embedding model name is empty".into()));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        if let Some(key) = api_key {
            let auth = format!("Bearer {}", key.trim());
            let value = reqwest::header::HeaderValue::from_str(&auth)
                .map_err(|_| Error::Config("invalid API key".into()))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            max_retries,
        })
    }

    fn should_retry_status(status: reqwest::StatusCode) -> bool {
        status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
    }

    fn should_retry_error(err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect() || err.is_request()
    }

    fn backoff(attempt: usize) -> Duration {
        let capped = attempt.min(5) as u32;
        Duration::from_millis(500 * (1 << capped))
    }
}

impl EmbeddingProvider for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let mut attempt = 0usize;
        loop {
            let response =
                self.client.post(&self.endpoint).json(&request).send();

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let mut parsed: EmbeddingResponse = resp.json()?;
                        parsed.data.sort_by_key(|entry| entry.index);
                        if parsed.data.len() != texts.len() {
                            return Err(Error::Provider(format!(
                                "endpoint returned {} embeddings for {} inputs",
                                parsed.data.len(),
                                texts.len()
                            )));
                        }
                        return Ok(parsed
                            .data
                            .into_iter()
                            .map(|entry| entry.embedding)
                            .collect());
                    }

                    if Self::should_retry_status(status)
                        && attempt + 1 < self.max_retries
                    {
                        attempt += 1;
                        tracing::debug!(%status, attempt, "retrying embedding request");
                        thread::sleep(Self::backoff(attempt));
                        continue;
                    }
                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    return Err(Error::Provider(format!(
                        "embeddings request failed ({status}): {body}"
                    )));
                }
                Err(err) => {
                    if Self::should_retry_error(&err)
                        && attempt + 1 < self.max_retries
                    {
                        attempt += 1;
                        tracing::debug!(error = %err, attempt, "retrying embedding request");
                        thread::sleep(Self::backoff(attempt));
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }
}

impl std::fmt::Debug for HttpEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbedder")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
