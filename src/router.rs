//! Query routing and answering.
//!
//! A question moves through
//! `Received → Validated → Classified → Retrieving → ContextAssembled →
//! Answering → Done`, or stops early at `Rejected`, `TimedOut` or `Failed`.
//! Every transition is logged at debug level.
//!
//! The router never returns an error: every failure becomes a complete
//! [`QueryResponse`] with a user-facing answer and an [`QueryOutcome`] tag.
//!
//! Conversation memory is per router, so each chat session gets its own
//! [`QueryRouter`] while the index manager and LLM are shared.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use scriptdocs_core::llm::{LlmProvider, Prompt, Turn};

use crate::config::RetrievalMode;
use crate::error::{IndexError, QueryError, ValidationError};
use crate::index::VectorIndexManager;
use crate::prompts;

pub const TIMEOUT_MESSAGE: &str =
    "The request timed out. Please simplify your question and try again.";

const ERROR_PREFIX: &str = "An error occurred while processing your question: ";

/// What the user wants from a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    QuestionAnswering,
    CodeGeneration,
    ErrorAnalysis,
}

/// Checked in order; the first rule with a matching whole word wins.
pub const INTENT_RULES: &[(Intent, &[&str])] = &[
    (
        Intent::ErrorAnalysis,
        &[
            "error", "errors", "debug", "debugging", "fix", "bug", "bugs", "crash", "crashes",
            "exception", "broken",
        ],
    ),
    (
        Intent::CodeGeneration,
        &[
            "create", "generate", "write", "implement", "build", "make",
        ],
    ),
];

/// Classify a question by whole-word, case-insensitive keyword match.
pub fn classify(question: &str) -> Intent {
    let words: Vec<String> = question
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();

    INTENT_RULES
        .iter()
        .find(|(_, terms)| words.iter().any(|w| terms.contains(&w.as_str())))
        .map(|(intent, _)| *intent)
        .unwrap_or(Intent::QuestionAnswering)
}

/// The trimmed question, or why it was rejected.
pub fn validate(question: Option<&str>) -> Result<&str, ValidationError> {
    let question = question.ok_or(ValidationError::Missing)?.trim();
    if question.is_empty() {
        return Err(ValidationError::Empty);
    }
    Ok(question)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Received,
    Validated,
    Classified,
    Retrieving,
    ContextAssembled,
    Answering,
    Done,
    Rejected,
    TimedOut,
    Failed,
}

fn transition(state: QueryState) {
    debug!(?state, "query state");
}

/// How a query ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutcome {
    Answered,
    Rejected,
    TimedOut,
    ProviderFailed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<String>,
    pub chat_history: Vec<Turn>,
    pub outcome: QueryOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
}

/// Most recent turns, oldest first, capped at `max_turns`.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    turns: VecDeque<Turn>,
    max_turns: usize,
}

impl ConversationMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(max_turns),
            max_turns,
        }
    }

    pub fn push(&mut self, turn: Turn) {
        if self.max_turns == 0 {
            return;
        }
        while self.turns.len() >= self.max_turns {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    pub fn turns(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

pub struct QueryRouter {
    index: Arc<VectorIndexManager>,
    llm: Arc<dyn LlmProvider>,
    mode: RetrievalMode,
    /// One answer in flight per router.
    slot: Arc<Semaphore>,
    timeout: Duration,
    memory: Mutex<ConversationMemory>,
}

impl QueryRouter {
    pub fn new(
        index: Arc<VectorIndexManager>,
        llm: Arc<dyn LlmProvider>,
        timeout: Duration,
        max_turns: usize,
    ) -> Self {
        let mode = index.retrieval_config().mode;
        Self {
            index,
            llm,
            mode,
            slot: Arc::new(Semaphore::new(1)),
            timeout,
            memory: Mutex::new(ConversationMemory::new(max_turns)),
        }
    }

    /// Answer a question. Never fails; see [`QueryOutcome`].
    pub async fn process_query(&self, question: Option<&str>) -> QueryResponse {
        transition(QueryState::Received);
        let question = match validate(question) {
            Ok(q) => q,
            Err(reason) => {
                transition(QueryState::Rejected);
                info!(%reason, "question rejected");
                return self.respond(
                    ValidationError::USER_MESSAGE.to_string(),
                    Vec::new(),
                    QueryOutcome::Rejected,
                    None,
                );
            }
        };
        transition(QueryState::Validated);

        let intent = classify(question);
        transition(QueryState::Classified);
        info!(?intent, "processing question");

        transition(QueryState::Retrieving);
        let context = match intent {
            Intent::CodeGeneration => self.index.code_generation_context(question, self.mode).await,
            Intent::QuestionAnswering | Intent::ErrorAnalysis => {
                self.index.general_context(question, self.mode).await
            }
        };
        let context = match context {
            Ok(context) => context,
            Err(IndexError::Provider(e)) => return self.fail(QueryError::Provider(e), intent),
            Err(e) => return self.fail(QueryError::Retrieval(e), intent),
        };
        let sources = prompts::sources(&context);
        let history = self.memory.lock().unwrap().turns();
        let prompt = prompts::build_prompt(intent, &context, question, history);
        transition(QueryState::ContextAssembled);
        debug!(chunks = context.chunks().len(), sources = sources.len(), "context assembled");

        transition(QueryState::Answering);
        match self.answer(prompt).await {
            Ok(answer) => {
                self.memory.lock().unwrap().push(Turn {
                    question: question.to_string(),
                    answer: answer.clone(),
                });
                transition(QueryState::Done);
                self.respond(answer, sources, QueryOutcome::Answered, Some(intent))
            }
            Err(e) => self.fail(e, intent),
        }
    }

    /// Answer a question given as untyped JSON. Anything but a string is rejected.
    pub async fn process_query_value(&self, question: &serde_json::Value) -> QueryResponse {
        match question {
            serde_json::Value::String(s) => self.process_query(Some(s.as_str())).await,
            serde_json::Value::Null => self.process_query(None).await,
            _ => {
                transition(QueryState::Received);
                transition(QueryState::Rejected);
                info!(reason = %ValidationError::NotAString, "question rejected");
                self.respond(
                    ValidationError::USER_MESSAGE.to_string(),
                    Vec::new(),
                    QueryOutcome::Rejected,
                    None,
                )
            }
        }
    }

    pub fn clear_history(&self) {
        self.memory.lock().unwrap().clear();
        info!("conversation memory cleared");
    }

    pub fn chat_history(&self) -> Vec<Turn> {
        self.memory.lock().unwrap().turns()
    }

    /// Run the LLM in the router's single slot, bounded by the timeout.
    async fn answer(&self, prompt: Prompt) -> Result<String, QueryError> {
        let deadline = Instant::now() + self.timeout;
        let timed_out = || QueryError::Timeout(self.timeout.as_secs());

        let permit = tokio::time::timeout_at(deadline, Arc::clone(&self.slot).acquire_owned())
            .await
            .map_err(|_| timed_out())?
            .map_err(|e| QueryError::Internal(e.to_string()))?;

        let llm = Arc::clone(&self.llm);
        let mut task = tokio::spawn(async move {
            let _permit = permit;
            llm.invoke(&prompt).await
        });

        match tokio::time::timeout_at(deadline, &mut task).await {
            Err(_) => {
                task.abort();
                Err(timed_out())
            }
            Ok(Err(join)) => Err(QueryError::Internal(format!("answer worker failed: {}", join))),
            Ok(Ok(result)) => Ok(result?),
        }
    }

    fn fail(&self, error: QueryError, intent: Intent) -> QueryResponse {
        match error {
            QueryError::Timeout(secs) => {
                transition(QueryState::TimedOut);
                warn!(timeout_secs = secs, "query timed out");
                self.respond(
                    TIMEOUT_MESSAGE.to_string(),
                    Vec::new(),
                    QueryOutcome::TimedOut,
                    Some(intent),
                )
            }
            QueryError::Provider(e) => {
                transition(QueryState::Failed);
                warn!(error = %e, "provider failed");
                self.respond(
                    format!("{}{}", ERROR_PREFIX, e.user_message()),
                    Vec::new(),
                    QueryOutcome::ProviderFailed,
                    Some(intent),
                )
            }
            other => {
                transition(QueryState::Failed);
                warn!(error = %other, "query failed, clearing conversation memory");
                self.memory.lock().unwrap().clear();
                self.respond(
                    format!("{}{}", ERROR_PREFIX, other),
                    Vec::new(),
                    QueryOutcome::Failed,
                    Some(intent),
                )
            }
        }
    }

    fn respond(
        &self,
        answer: String,
        sources: Vec<String>,
        outcome: QueryOutcome,
        intent: Option<Intent>,
    ) -> QueryResponse {
        QueryResponse {
            answer,
            sources,
            chat_history: self.chat_history(),
            outcome,
            intent,
        }
    }
}
