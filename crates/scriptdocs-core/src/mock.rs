//! Deterministic mock providers for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::ProviderError;
use crate::llm::{LlmProvider, Prompt};

/// Hashed bag-of-words embedder. Texts sharing words get similar vectors.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    pub dims: usize,
    /// Fail every batch.
    pub fail_all: bool,
    /// Fail any batch containing a text with this marker.
    pub fail_marker: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self {
            dims: 256,
            fail_all: false,
            fail_marker: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl MockEmbedder {
    #[must_use]
    pub fn with_dims(dims: usize) -> Self {
        Self {
            dims,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn fail_when_contains(mut self, marker: &str) -> Self {
        self.fail_marker = Some(marker.to_string());
        self
    }

    /// Number of `embed_batch` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The vector this embedder produces for `text`.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims.max(1)];
        for token in text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
        {
            let slot = fnv1a(&token.to_lowercase()) as usize % v.len();
            v[slot] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    fn model_name(&self) -> &str {
        "mock-embedder"
    }

    fn dims(&self) -> usize {
        self.dims.max(1)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all {
            return Err(ProviderError::Unavailable("mock embedder failure".into()));
        }
        if let Some(marker) = &self.fail_marker {
            if texts.iter().any(|t| t.contains(marker.as_str())) {
                return Err(ProviderError::RateLimited("mock batch failure".into()));
            }
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

fn fnv1a(s: &str) -> u64 {
    s.bytes().fold(0xcbf2_9ce4_8422_2325u64, |hash, b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

/// Scripted LLM. Returns queued responses, then `default_response`.
#[derive(Debug, Clone)]
pub struct MockLlm {
    responses: Arc<Mutex<Vec<String>>>,
    prompts: Arc<Mutex<Vec<Prompt>>>,
    pub default_response: String,
    pub fail_with: Option<ProviderError>,
    pub panic: bool,
    /// Milliseconds to sleep before answering.
    pub delay_ms: u64,
}

impl Default for MockLlm {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            prompts: Arc::new(Mutex::new(Vec::new())),
            default_response: "mock answer".into(),
            fail_with: None,
            panic: false,
            delay_ms: 0,
        }
    }
}

impl MockLlm {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing(err: ProviderError) -> Self {
        Self {
            fail_with: Some(err),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn panicking() -> Self {
        Self {
            panic: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for MockLlm {
    fn name(&self) -> &str {
        "mock"
    }

    async fn invoke(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        self.prompts.lock().unwrap().push(prompt.clone());
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if self.panic {
            panic!("mock LLM panic");
        }
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(self.default_response.clone())
        } else {
            Ok(responses.remove(0))
        }
    }
}
