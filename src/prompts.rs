//! Prompt profiles and context assembly.
//!
//! One system prompt per [`Intent`]. The user turn carries the retrieved
//! context followed by the question; prior turns travel as chat history.

use std::collections::HashSet;

use scriptdocs_core::llm::{Prompt, Turn};
use scriptdocs_core::models::DocumentChunk;

use crate::index::RetrievalContext;
use crate::router::Intent;

const QA_SYSTEM: &str = "\
You are an expert assistant for T#, the scripting language of a game-creation studio.
Answer questions using the documentation excerpts provided with each question.
Point out where T# behaves differently from Unity C#.
Quote rules and function signatures exactly as they appear in the excerpts.
If the excerpts do not cover the question, say so plainly and give general T# guidance.";

const CODE_SYSTEM: &str = "\
You are an expert T# programmer writing code for a game-creation studio.
You receive three kinds of documentation: language rules, function signatures and
example mechanics. Follow every rule, call only the functions whose signatures are
listed or that appear in the examples, and reuse patterns from the examples.
Return complete, commented code and briefly explain how it works.
If something needed is missing from the documentation, say what you assumed.";

const ERROR_SYSTEM: &str = "\
You are a T# debugging assistant for a game-creation studio.
Explain what the error means in T# terms and its most likely causes.
Give a corrected version of the code and a tip for avoiding the mistake.
Ground your explanation in the documentation excerpts provided with each question.";

const NO_CONTEXT: &str = "No matching documentation was found.";

/// System prompt for an intent.
pub fn system_prompt(intent: Intent) -> &'static str {
    match intent {
        Intent::QuestionAnswering => QA_SYSTEM,
        Intent::CodeGeneration => CODE_SYSTEM,
        Intent::ErrorAnalysis => ERROR_SYSTEM,
    }
}

fn closing_instruction(intent: Intent) -> &'static str {
    match intent {
        Intent::QuestionAnswering => {
            "Give a detailed answer that refers to the relevant documentation and examples."
        }
        Intent::CodeGeneration => "Write the T# code, following the rules above.",
        Intent::ErrorAnalysis => {
            "Explain the error, its likely causes, and a corrected example."
        }
    }
}

/// Render retrieved chunks as prompt text, in rank order.
pub fn format_context(context: &RetrievalContext) -> String {
    let text = match context {
        RetrievalContext::Flat(chunks) => join_chunks(chunks),
        RetrievalContext::Grouped {
            rules,
            functions,
            examples,
        } => [
            ("Rules", rules),
            ("Function Signatures", functions),
            ("Examples", examples),
        ]
        .iter()
        .filter(|(_, chunks)| !chunks.is_empty())
        .map(|(label, chunks)| format!("## {}\n\n{}", label, join_chunks(chunks)))
        .collect::<Vec<_>>()
        .join("\n\n"),
    };

    if text.is_empty() {
        NO_CONTEXT.to_string()
    } else {
        text
    }
}

fn join_chunks(chunks: &[DocumentChunk]) -> String {
    chunks
        .iter()
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Sources of every used chunk, deduplicated, first-seen order.
pub fn sources(context: &RetrievalContext) -> Vec<String> {
    let mut seen = HashSet::new();
    context
        .chunks()
        .into_iter()
        .filter(|c| seen.insert(c.metadata.source.as_str()))
        .map(|c| c.metadata.source.clone())
        .collect()
}

/// Assemble the full prompt for one question.
pub fn build_prompt(
    intent: Intent,
    context: &RetrievalContext,
    question: &str,
    history: Vec<Turn>,
) -> Prompt {
    Prompt {
        system: system_prompt(intent).to_string(),
        history,
        user: format!(
            "Available context:\n{}\n\nQuestion: {}\n\n{}",
            format_context(context),
            question,
            closing_instruction(intent)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptdocs_core::models::{ChunkMetadata, DocType};

    fn chunk(source: &str, doc_type: DocType, content: &str) -> DocumentChunk {
        DocumentChunk {
            content: content.to_string(),
            metadata: ChunkMetadata {
                source: source.to_string(),
                doc_type,
                title: "T".to_string(),
                has_code: false,
                chunk_index: 0,
                total_chunks: 1,
                content_length: content.len(),
            },
        }
    }

    #[test]
    fn test_grouped_context_sections_in_order() {
        let context = RetrievalContext::Grouped {
            rules: vec![chunk("rules.md", DocType::Ruleset, "rule one")],
            functions: vec![],
            examples: vec![chunk("ex.md", DocType::Example, "example one")],
        };
        let text = format_context(&context);
        let rules_at = text.find("## Rules").unwrap();
        let examples_at = text.find("## Examples").unwrap();
        assert!(rules_at < examples_at);
        assert!(!text.contains("## Function Signatures"));
        assert!(text.contains("rule one"));
    }

    #[test]
    fn test_empty_context_placeholder() {
        assert_eq!(format_context(&RetrievalContext::Flat(vec![])), NO_CONTEXT);
    }

    #[test]
    fn test_sources_dedup_first_seen() {
        let context = RetrievalContext::Flat(vec![
            chunk("b.md", DocType::Functions, "1"),
            chunk("a.md", DocType::Functions, "2"),
            chunk("b.md", DocType::Functions, "3"),
        ]);
        assert_eq!(sources(&context), vec!["b.md", "a.md"]);
    }

    #[test]
    fn test_build_prompt_carries_question_and_history() {
        let history = vec![Turn {
            question: "q".to_string(),
            answer: "a".to_string(),
        }];
        let context = RetrievalContext::Flat(vec![chunk("a.md", DocType::Ruleset, "ctx")]);
        let prompt = build_prompt(Intent::ErrorAnalysis, &context, "why null?", history);
        assert_eq!(prompt.system, ERROR_SYSTEM);
        assert_eq!(prompt.history.len(), 1);
        assert!(prompt.user.contains("Question: why null?"));
        assert!(prompt.user.contains("ctx"));
    }
}
