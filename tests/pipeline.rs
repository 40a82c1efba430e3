//! End-to-end pipeline tests against the library: load a corpus, index it,
//! and answer questions with deterministic mock providers.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use scriptdocs::app::{App, Providers};
use scriptdocs::config::{parse_config, Config};
use scriptdocs::error::{ProviderError, ValidationError};
use scriptdocs::index::{IndexReport, RetrievalContext, VectorIndexManager, INDEX_FILE};
use scriptdocs::loader::DocumentLoader;
use scriptdocs::progress::NoProgress;
use scriptdocs::router::{Intent, QueryOutcome, QueryRouter, TIMEOUT_MESSAGE};
use scriptdocs_core::llm::{LlmProvider, Prompt};
use scriptdocs_core::mock::{MockEmbedder, MockLlm};
use scriptdocs_core::models::DocType;
use scriptdocs_core::store::memory::InMemoryCollection;

const RULES: &str = "# Scripting Rules\n\n## Type\nRULESET\n\n\
Every script must declare its entity before use. Coroutines are not supported, \
so timed behaviour goes through the scheduler. Reflection is unavailable and \
generic constraints are limited to class and struct.\n";

const FUNCTIONS: &str = "# Coin Functions\n\n## Type\nFUNCTIONS\n\n\
Functions for spawning and collecting coins in a level.\n\n\
```csharp\nvoid SpawnCoin(Vector3 position, int value);\nbool CollectCoin(Entity player, Entity coin);\n```\n";

const EXAMPLE: &str = "# Coin Spawner Example\n\n## Type\nEXAMPLE\n\n\
A spawner that drops a coin every few seconds near the player.\n\n\
```csharp\npublic class CoinSpawner : Script {\n    void OnTick() {\n        SpawnCoin(player.Position, 10);\n    }\n}\n```\n";

fn write_corpus(root: &Path) {
    fs::write(root.join("rules.md"), RULES).unwrap();
    fs::write(root.join("functions.md"), FUNCTIONS).unwrap();
    fs::write(root.join("example.md"), EXAMPLE).unwrap();
}

fn config_for(root: &Path) -> Config {
    let text = format!(
        "[knowledge_base]\npath = {:?}\n\n\
         [loader]\nmax_retries = 1\nretry_delay_ms = 1\n\n\
         [index]\nbatch_delay_ms = 0\ncache_dir = {:?}\n\n\
         [memory]\nmax_turns = 3\n",
        root.join("docs").display().to_string(),
        root.join("cache").display().to_string(),
    );
    parse_config(&text).unwrap()
}

fn setup() -> (TempDir, Config) {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    fs::create_dir_all(&docs).unwrap();
    write_corpus(&docs);
    let config = config_for(tmp.path());
    (tmp, config)
}

async fn build_index(
    config: &Config,
    embedder: MockEmbedder,
) -> (Arc<VectorIndexManager>, IndexReport) {
    let index = VectorIndexManager::with_collection(
        Arc::new(InMemoryCollection::new("test_docs")),
        Arc::new(embedder),
        config.index.clone(),
        config.retrieval.clone(),
    );
    let report = index
        .get_or_create_vector_store(&DocumentLoader::new(config), false)
        .await
        .unwrap();
    (Arc::new(index), report)
}

async fn router_with(config: &Config, llm: Arc<dyn LlmProvider>) -> QueryRouter {
    let (index, _) = build_index(config, MockEmbedder::default()).await;
    App::from_parts(config.clone(), index, llm).router()
}

/// Plays back one step per call.
enum Step {
    Answer(&'static str),
    Fail(ProviderError),
    Panic,
}

struct ScriptedLlm {
    steps: Vec<Step>,
    next: AtomicUsize,
}

impl ScriptedLlm {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            next: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, _prompt: &Prompt) -> Result<String, ProviderError> {
        let i = self.next.fetch_add(1, Ordering::SeqCst);
        match self.steps.get(i) {
            Some(Step::Answer(text)) => Ok(text.to_string()),
            Some(Step::Fail(err)) => Err(err.clone()),
            Some(Step::Panic) => panic!("scripted LLM panic"),
            None => Ok("done".to_string()),
        }
    }
}

// ============ Loading and indexing ============

#[tokio::test]
async fn test_malformed_file_is_reported_not_fatal() {
    let (tmp, config) = setup();
    fs::write(tmp.path().join("docs/broken.md"), [0xff, 0xfe, 0x00, 0x41]).unwrap();

    let loader = DocumentLoader::new(&config);
    let chunks = loader.load_documents().await.unwrap();
    let stats = loader.get_processing_stats();

    assert_eq!(stats.total_files, 4);
    assert_eq!(stats.successful_files, 3);
    assert_eq!(stats.failed_files, 1);
    assert_eq!(stats.failed[0].source, "broken.md");
    assert_eq!(stats.total_chunks, chunks.len());

    let types: Vec<DocType> = chunks.iter().map(|c| c.metadata.doc_type).collect();
    for doc_type in DocType::ALL {
        assert!(types.contains(&doc_type), "missing {}", doc_type);
    }
}

#[tokio::test]
async fn test_empty_corpus_is_an_error() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("docs")).unwrap();
    let config = config_for(tmp.path());

    let loader = DocumentLoader::new(&config);
    assert!(loader.load_documents().await.is_err());
}

#[tokio::test]
async fn test_reindexing_unchanged_corpus_embeds_nothing() {
    let (_tmp, config) = setup();
    let embedder = MockEmbedder::default();
    let (index, first) = build_index(&config, embedder.clone()).await;
    assert!(first.indexed > 0);
    assert_eq!(first.failed_chunks, 0);
    let calls = embedder.calls();

    let second = index
        .get_or_create_vector_store(&DocumentLoader::new(&config), false)
        .await
        .unwrap();
    assert_eq!(second.indexed, 0);
    assert_eq!(second.already_indexed, first.indexed);
    assert_eq!(embedder.calls(), calls);

    let stats = index.collection_stats().await.unwrap();
    assert_eq!(stats.total, first.indexed);
}

#[tokio::test]
async fn test_changed_file_reindexes_only_its_chunks() {
    let (tmp, config) = setup();
    let (index, first) = build_index(&config, MockEmbedder::default()).await;

    let edited = EXAMPLE.replace("every few seconds", "every ten seconds");
    fs::write(tmp.path().join("docs/example.md"), edited).unwrap();

    let loader = DocumentLoader::new(&config);
    let second = index.get_or_create_vector_store(&loader, false).await.unwrap();
    let example_chunks = loader
        .load_documents()
        .await
        .unwrap()
        .into_iter()
        .filter(|c| c.metadata.source == "example.md")
        .count();
    assert_eq!(second.indexed, example_chunks);
    assert_eq!(second.already_indexed, first.indexed - example_chunks);

    // The old example chunks are stale until pruned.
    let current = loader.load_documents().await.unwrap();
    let removed = index.prune_stale(&current).await.unwrap();
    assert_eq!(removed, example_chunks);
    assert_eq!(index.collection_stats().await.unwrap().total, current.len());
}

#[tokio::test]
async fn test_force_recreate_rebuilds() {
    let (_tmp, config) = setup();
    let (index, first) = build_index(&config, MockEmbedder::default()).await;
    let report = index
        .get_or_create_vector_store(&DocumentLoader::new(&config), true)
        .await
        .unwrap();
    assert_eq!(report.already_indexed, 0);
    assert_eq!(report.indexed, first.indexed);
}

#[tokio::test]
async fn test_failed_batch_is_skipped() {
    let (_tmp, mut config) = setup();
    config.index.batch_size = 1;
    let embedder = MockEmbedder::default().fail_when_contains("CoinSpawner");
    let (index, report) = build_index(&config, embedder).await;

    assert_eq!(report.failed_batches, 1);
    assert_eq!(report.failed_chunks, 1);
    assert_eq!(report.indexed, report.candidates - 1);
    assert_eq!(index.collection_stats().await.unwrap().total, report.indexed);
}

#[tokio::test]
async fn test_counts_by_doc_type() {
    let (_tmp, config) = setup();
    let (index, _) = build_index(&config, MockEmbedder::default()).await;
    let stats = index.collection_stats().await.unwrap();
    let count = |t: DocType| {
        stats
            .by_doc_type
            .iter()
            .find(|(d, _)| *d == t)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    };
    assert!(count(DocType::Ruleset) >= 1);
    assert!(count(DocType::Functions) >= 1);
    assert!(count(DocType::Example) >= 1);
}

// ============ Retrieval ============

#[tokio::test]
async fn test_code_generation_context_is_grouped_and_bounded() {
    let (tmp, mut config) = setup();
    config.retrieval.rules_k = 1;
    let second_rules = RULES.replace("# Scripting Rules", "# More Scripting Rules");
    fs::write(tmp.path().join("docs/rules2.md"), second_rules).unwrap();
    let (index, _) = build_index(&config, MockEmbedder::default()).await;

    let context = index
        .code_generation_context("write a coin spawner", config.retrieval.mode)
        .await
        .unwrap();
    let RetrievalContext::Grouped {
        rules,
        functions,
        examples,
    } = context
    else {
        panic!("expected grouped context");
    };
    assert_eq!(rules.len(), 1);
    assert!(!functions.is_empty() && functions.len() <= config.retrieval.functions_k);
    assert!(!examples.is_empty() && examples.len() <= config.retrieval.examples_k);
    assert!(rules.iter().all(|c| c.metadata.doc_type == DocType::Ruleset));
    assert!(functions.iter().all(|c| c.metadata.doc_type == DocType::Functions));
    assert!(examples.iter().all(|c| c.metadata.doc_type == DocType::Example));
}

// ============ Query routing ============

#[tokio::test]
async fn test_invalid_questions_are_rejected_without_llm_call() {
    let (_tmp, config) = setup();
    let llm = MockLlm::default();
    let router = router_with(&config, Arc::new(llm.clone())).await;

    for question in [None, Some(""), Some("   \n\t")] {
        let response = router.process_query(question).await;
        assert_eq!(response.outcome, QueryOutcome::Rejected);
        assert_eq!(response.answer, ValidationError::USER_MESSAGE);
        assert!(response.sources.is_empty());
        assert!(response.intent.is_none());
    }
    for value in [json!(42), json!(null), json!(["a"]), json!({"q": "hi"})] {
        let response = router.process_query_value(&value).await;
        assert_eq!(response.outcome, QueryOutcome::Rejected);
    }
    assert!(llm.prompts().is_empty());

    let response = router
        .process_query_value(&json!("What is a ruleset?"))
        .await;
    assert_eq!(response.outcome, QueryOutcome::Answered);
}

#[tokio::test]
async fn test_answer_carries_sources_and_history() {
    let (_tmp, config) = setup();
    let llm = MockLlm::with_responses(vec!["first answer".into(), "second answer".into()]);
    let router = router_with(&config, Arc::new(llm.clone())).await;

    let response = router
        .process_query(Some("How do coins get collected?"))
        .await;
    assert_eq!(response.outcome, QueryOutcome::Answered);
    assert_eq!(response.intent, Some(Intent::QuestionAnswering));
    assert_eq!(response.answer, "first answer");
    assert!(!response.sources.is_empty());
    let mut unique = response.sources.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), response.sources.len());
    assert_eq!(response.chat_history.len(), 1);

    let response = router.process_query(Some("And spawning them?")).await;
    assert_eq!(response.chat_history.len(), 2);
    assert_eq!(response.chat_history[1].answer, "second answer");

    let prompts = llm.prompts();
    assert!(prompts[0].history.is_empty());
    assert_eq!(prompts[1].history.len(), 1);
    assert_eq!(prompts[1].history[0].question, "How do coins get collected?");
}

#[tokio::test]
async fn test_code_generation_prompt_has_grouped_context() {
    let (_tmp, config) = setup();
    let llm = MockLlm::default();
    let router = router_with(&config, Arc::new(llm.clone())).await;

    let response = router
        .process_query(Some("Write a script that spawns coins near the player"))
        .await;
    assert_eq!(response.intent, Some(Intent::CodeGeneration));
    assert_eq!(response.outcome, QueryOutcome::Answered);

    let prompt = &llm.prompts()[0];
    let rules = prompt.user.find("## Rules").unwrap();
    let functions = prompt.user.find("## Function Signatures").unwrap();
    let examples = prompt.user.find("## Examples").unwrap();
    assert!(rules < functions && functions < examples);
    assert!(prompt.user.contains("Question: Write a script that spawns coins"));
}

#[tokio::test]
async fn test_error_questions_use_error_profile() {
    let (_tmp, config) = setup();
    let llm = MockLlm::default();
    let router = router_with(&config, Arc::new(llm.clone())).await;

    let response = router
        .process_query(Some("Why does SpawnCoin throw an error?"))
        .await;
    assert_eq!(response.intent, Some(Intent::ErrorAnalysis));
    assert!(llm.prompts()[0].system.contains("debugging"));
}

#[tokio::test]
async fn test_hanging_llm_times_out_and_keeps_history() {
    let (_tmp, config) = setup();
    let (index, _) = build_index(&config, MockEmbedder::default()).await;
    let llm = MockLlm::default().with_delay(10_000);
    let router = QueryRouter::new(index, Arc::new(llm), Duration::from_millis(50), 3);

    let response = router.process_query(Some("What is a ruleset?")).await;
    assert_eq!(response.outcome, QueryOutcome::TimedOut);
    assert_eq!(response.answer, TIMEOUT_MESSAGE);
    assert!(response.sources.is_empty());
    assert!(router.chat_history().is_empty());
}

#[tokio::test]
async fn test_provider_failure_preserves_history() {
    let (_tmp, config) = setup();
    let llm = ScriptedLlm::new(vec![
        Step::Answer("rulesets define constraints"),
        Step::Fail(ProviderError::RateLimited("429".into())),
    ]);
    let router = router_with(&config, Arc::new(llm)).await;

    router.process_query(Some("What is a ruleset?")).await;
    let response = router.process_query(Some("And functions?")).await;
    assert_eq!(response.outcome, QueryOutcome::ProviderFailed);
    assert!(response.answer.contains("Rate limit exceeded"));
    assert!(!response.answer.contains("429"));
    assert_eq!(response.chat_history.len(), 1);
}

#[tokio::test]
async fn test_unexpected_failure_clears_history() {
    let (_tmp, config) = setup();
    let llm = ScriptedLlm::new(vec![Step::Answer("ok"), Step::Panic]);
    let router = router_with(&config, Arc::new(llm)).await;

    router.process_query(Some("What is a ruleset?")).await;
    assert_eq!(router.chat_history().len(), 1);

    let response = router.process_query(Some("And functions?")).await;
    assert_eq!(response.outcome, QueryOutcome::Failed);
    assert!(response
        .answer
        .starts_with("An error occurred while processing your question: "));
    assert!(response.chat_history.is_empty());
    assert!(router.chat_history().is_empty());
}

#[tokio::test]
async fn test_embedding_failure_at_query_time() {
    let (_tmp, config) = setup();
    let (index, _) = build_index(&config, MockEmbedder::default().fail_when_contains("BROKEN")).await;
    let router = QueryRouter::new(index, Arc::new(MockLlm::default()), Duration::from_secs(5), 3);

    let response = router.process_query(Some("What does BROKEN mean?")).await;
    assert_eq!(response.outcome, QueryOutcome::ProviderFailed);
    assert!(response.answer.contains("Rate limit exceeded"));
}

#[tokio::test]
async fn test_memory_keeps_most_recent_turns() {
    let (_tmp, mut config) = setup();
    config.memory.max_turns = 2;
    let router = router_with(&config, Arc::new(MockLlm::default())).await;

    for q in ["first question", "second question", "third question"] {
        router.process_query(Some(q)).await;
    }
    let history = router.chat_history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].question, "second question");
    assert_eq!(history[1].question, "third question");

    router.clear_history();
    assert!(router.chat_history().is_empty());
}

#[tokio::test]
async fn test_sessions_have_separate_memory() {
    let (_tmp, config) = setup();
    let (index, _) = build_index(&config, MockEmbedder::default()).await;
    let app = App::from_parts(config, index, Arc::new(MockLlm::default()));

    let a = app.router();
    let b = app.router();
    a.process_query(Some("What is a ruleset?")).await;
    assert_eq!(a.chat_history().len(), 1);
    assert!(b.chat_history().is_empty());
}

// ============ SQLite-backed app ============

fn mock_providers(llm: MockLlm) -> Providers {
    Providers {
        embedder: Arc::new(MockEmbedder::default()),
        llm: Arc::new(llm),
        progress: Box::new(NoProgress),
    }
}

#[tokio::test]
async fn test_temporary_index_removed_on_shutdown() {
    let (_tmp, mut config) = setup();
    config.index.enable_cache = false;

    let app = App::bootstrap_with(config, false, mock_providers(MockLlm::default()))
        .await
        .unwrap();
    let dir = app.index().storage_path().unwrap();
    assert!(dir.join(INDEX_FILE).exists());
    app.shutdown().await;
    assert!(!dir.exists());
}

#[tokio::test]
async fn test_concurrent_temporary_indexes_survive_startup() {
    let (_tmp, mut config) = setup();
    config.index.enable_cache = false;

    let first = App::bootstrap_with(config.clone(), false, mock_providers(MockLlm::default()))
        .await
        .unwrap();
    let second = App::bootstrap_with(config, false, mock_providers(MockLlm::default()))
        .await
        .unwrap();

    let dir = first.index().storage_path().unwrap();
    assert!(dir.join(INDEX_FILE).exists());
    let response = first.router().process_query(Some("How are coins spawned?")).await;
    assert_eq!(response.outcome, QueryOutcome::Answered);
    assert!(!response.sources.is_empty());

    second.shutdown().await;
    first.shutdown().await;
}

#[tokio::test]
async fn test_persistent_index_reused_across_runs() {
    let (tmp, mut config) = setup();
    config.index.enable_cache = true;

    let app = App::bootstrap_with(config.clone(), false, mock_providers(MockLlm::default()))
        .await
        .unwrap();
    let indexed = app.report().indexed;
    assert!(indexed > 0);
    assert!(tmp.path().join("cache").join(INDEX_FILE).exists());
    let response = app.router().process_query(Some("How are coins spawned?")).await;
    assert_eq!(response.outcome, QueryOutcome::Answered);
    assert!(!response.sources.is_empty());
    app.shutdown().await;

    let app = App::bootstrap_with(config, false, mock_providers(MockLlm::default()))
        .await
        .unwrap();
    assert_eq!(app.report().indexed, 0);
    assert_eq!(app.report().already_indexed, indexed);
    app.shutdown().await;
}
