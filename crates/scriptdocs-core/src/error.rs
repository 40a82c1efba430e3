//! Errors raised by embedding and LLM providers.

use thiserror::Error;

/// Failure of an external embedding or LLM provider.
///
/// The `Display` form carries provider detail for logs. Callers that show
/// a message to end users should use [`ProviderError::user_message`], which
/// never leaks raw provider text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("invalid API credential: {0}")]
    InvalidCredential(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("input exceeds model context length: {0}")]
    InputTooLong(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider disabled: {0}")]
    Disabled(String),

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Short, stable message safe to show to end users.
    pub fn user_message(&self) -> &'static str {
        match self {
            ProviderError::InvalidCredential(_) => {
                "Invalid API key. Please check your provider credentials."
            }
            ProviderError::RateLimited(_) => {
                "Rate limit exceeded. Please wait a moment and try again."
            }
            ProviderError::InvalidModel(_) => {
                "The configured model is not available. Please check the model name."
            }
            ProviderError::InputTooLong(_) => {
                "The input is too long for the model. Please shorten your question."
            }
            ProviderError::Unavailable(_) => {
                "The model provider is currently unavailable. Please try again later."
            }
            ProviderError::Disabled(_) => "The model provider is not configured.",
            ProviderError::Other(_) => "The model provider returned an unexpected error.",
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_) | ProviderError::Unavailable(_)
        )
    }

    /// Classify a non-success HTTP response.
    ///
    /// Status codes decide most cases; a 400 is inspected for context-length
    /// and model complaints, which providers report in the body.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = format!("HTTP {}: {}", status, truncate(body, 300));
        let lower = body.to_ascii_lowercase();
        match status {
            401 | 403 => ProviderError::InvalidCredential(detail),
            429 => ProviderError::RateLimited(detail),
            404 => ProviderError::InvalidModel(detail),
            413 => ProviderError::InputTooLong(detail),
            500..=599 => ProviderError::Unavailable(detail),
            _ if lower.contains("context length")
                || lower.contains("context_length")
                || lower.contains("too long")
                || lower.contains("too many tokens") =>
            {
                ProviderError::InputTooLong(detail)
            }
            _ if lower.contains("model") && lower.contains("not found") => {
                ProviderError::InvalidModel(detail)
            }
            _ => ProviderError::Other(detail),
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
