//! Provider connectivity check.
//!
//! `sdocs check` sends one short request to the embedding provider and one
//! to the LLM before any indexing happens, so a bad key or model name shows
//! up as a one-line diagnosis instead of a run full of failed batches.

use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use scriptdocs_core::embedding::EmbeddingProvider;
use scriptdocs_core::llm::{LlmProvider, Prompt};

use crate::error::ProviderError;

const HEALTH_CHECK_TEXT: &str = "health check";
const HEALTH_CHECK_PROMPT: &str = "Reply with the single word: ok";

/// Outcome of one round trip to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderCheck {
    /// `"embedding"` or `"llm"`.
    pub role: &'static str,
    pub provider: String,
    pub ok: bool,
    /// User-facing reason for a failure.
    pub message: Option<String>,
    pub elapsed_ms: u64,
}

impl ProviderCheck {
    fn from_result(
        role: &'static str,
        provider: &str,
        started: Instant,
        result: Result<(), ProviderError>,
    ) -> Self {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(()) => {
                info!(role, provider, elapsed_ms, "provider check passed");
                Self {
                    role,
                    provider: provider.to_string(),
                    ok: true,
                    message: None,
                    elapsed_ms,
                }
            }
            Err(e) => {
                warn!(role, provider, error = %e, "provider check failed");
                Self {
                    role,
                    provider: provider.to_string(),
                    ok: false,
                    message: Some(e.user_message().to_string()),
                    elapsed_ms,
                }
            }
        }
    }
}

pub async fn check_embedder(embedder: &dyn EmbeddingProvider) -> ProviderCheck {
    let started = Instant::now();
    let result = embedder.embed_query(HEALTH_CHECK_TEXT).await.and_then(|v| {
        if v.len() == embedder.dims() {
            Ok(())
        } else {
            Err(ProviderError::InvalidModel(format!(
                "expected {} dims, got {}",
                embedder.dims(),
                v.len()
            )))
        }
    });
    ProviderCheck::from_result("embedding", embedder.model_name(), started, result)
}

pub async fn check_llm(llm: &dyn LlmProvider) -> ProviderCheck {
    let started = Instant::now();
    let prompt = Prompt {
        user: HEALTH_CHECK_PROMPT.to_string(),
        ..Prompt::default()
    };
    let result = llm.invoke(&prompt).await.and_then(|reply| {
        if reply.trim().is_empty() {
            Err(ProviderError::Other("empty reply".into()))
        } else {
            Ok(())
        }
    });
    ProviderCheck::from_result("llm", llm.name(), started, result)
}

/// Check both providers, embedding first.
pub async fn check_providers(
    embedder: &dyn EmbeddingProvider,
    llm: &dyn LlmProvider,
) -> Vec<ProviderCheck> {
    vec![check_embedder(embedder).await, check_llm(llm).await]
}

/// Print check results to stdout.
pub fn print_checks(checks: &[ProviderCheck]) {
    println!("Script Docs - Provider Check");
    println!("============================");
    println!();
    for check in checks {
        let status = if check.ok { "ok" } else { "FAILED" };
        println!(
            "  {:<10} {:<28} {:<7} {:>6} ms",
            check.role, check.provider, status, check.elapsed_ms
        );
        if let Some(message) = &check.message {
            println!("             {}", message);
        }
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DisabledProvider;
    use crate::llm::DisabledLlm;
    use scriptdocs_core::mock::{MockEmbedder, MockLlm};

    #[tokio::test]
    async fn test_working_providers_pass() {
        let embedder = MockEmbedder::default();
        let llm = MockLlm::with_responses(vec!["ok".into()]);
        let checks = check_providers(&embedder, &llm).await;

        assert_eq!(checks.len(), 2);
        assert!(checks.iter().all(|c| c.ok && c.message.is_none()));
        assert_eq!(checks[0].provider, "mock-embedder");
        assert_eq!(llm.prompts()[0].user, HEALTH_CHECK_PROMPT);
        assert_eq!(embedder.calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_reports_user_message() {
        let llm = MockLlm::failing(ProviderError::InvalidCredential(
            "HTTP 401: bad key sk-123".into(),
        ));
        let check = check_llm(&llm).await;
        assert!(!check.ok);
        let message = check.message.unwrap();
        assert_eq!(message, "Invalid API key. Please check your provider credentials.");
        assert!(!message.contains("sk-123"));
    }

    #[tokio::test]
    async fn test_empty_reply_fails() {
        let llm = MockLlm::with_responses(vec!["   ".into()]);
        assert!(!check_llm(&llm).await.ok);
    }

    #[tokio::test]
    async fn test_disabled_providers_not_configured() {
        let checks = check_providers(&DisabledProvider, &DisabledLlm).await;
        for check in &checks {
            assert!(!check.ok);
            assert_eq!(
                check.message.as_deref(),
                Some("The model provider is not configured.")
            );
        }
    }
}
