use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::{info, warn};

use super::session_keys;
use crate::flow::{Context, GraphError, NextAction, Result, Task, TaskResult};
use crate::models::{CategoryContext, DocumentRun};
use crate::schema::Category;

/// Contexts kept per category
const MAX_CONTEXTS: usize = 2;
const MIN_SENTENCE_CHARS: usize = 10;
/// Containment matches need the containing side to be longer than this
const MIN_CONTAINMENT_CHARS: usize = 20;

static SENTENCE_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+\s+").expect("valid regex"));
static INLINE_WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\S\n]+").expect("valid regex"));
static MISSING_SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([.!?])([A-Z])").expect("valid regex"));

/// Canonical full document text stored in every category's notes: blank lines
/// dropped, whitespace runs inside a line collapsed, and a space restored
/// between sentence punctuation and a following capital letter.
pub fn clean_full_text(text: &str) -> String {
    let joined = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let collapsed = INLINE_WHITESPACE_RE.replace_all(&joined, " ");
    let spaced = MISSING_SPACE_RE.replace_all(&collapsed, "$1 $2");
    spaced.trim().to_string()
}

/// Split on runs of `.`, `!`, `?` followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<String> {
    SENTENCE_SPLIT_RE
        .split(text.trim())
        .map(str::trim)
        .filter(|sentence| !sentence.is_empty())
        .map(str::to_string)
        .collect()
}

/// Position of `sentence` in `sentences`, trying progressively weaker matches:
/// exact value, case-insensitive equality, then containment in either
/// direction when the containing side is long enough.
pub fn locate_sentence(sentences: &[String], sentence: &str) -> Option<usize> {
    if let Some(index) = sentences.iter().position(|s| s == sentence) {
        return Some(index);
    }

    let wanted = sentence.trim().to_lowercase();
    if let Some(index) = sentences
        .iter()
        .position(|s| s.trim().to_lowercase() == wanted)
    {
        return Some(index);
    }

    let wanted_chars = wanted.chars().count();
    sentences.iter().position(|s| {
        let candidate = s.trim().to_lowercase();
        let candidate_chars = candidate.chars().count();
        (candidate.contains(&wanted) && candidate_chars > MIN_CONTAINMENT_CHARS)
            || (wanted.contains(&candidate) && wanted_chars > MIN_CONTAINMENT_CHARS)
    })
}

fn qualifies(sentence: &str, keywords: &[&str]) -> bool {
    let lower = sentence.to_lowercase();
    sentence.trim().chars().count() > MIN_SENTENCE_CHARS
        && keywords.iter().any(|keyword| lower.contains(keyword))
}

/// Derive per-category context snippets from the full document text.
///
/// Each qualifying sentence is paired with the sentence after it; the first two
/// pairs are joined with `". "`. Categories without a qualifying sentence get
/// no entry.
pub fn annotate(full_text: &str) -> CategoryContext {
    let sentences = split_sentences(full_text);
    let mut snippets = BTreeMap::new();

    for category in Category::ALL {
        let mut contexts: Vec<String> = Vec::new();

        for sentence in &sentences {
            if contexts.len() == MAX_CONTEXTS {
                break;
            }
            if !qualifies(sentence, category.keywords()) {
                continue;
            }

            let Some(index) = locate_sentence(&sentences, sentence) else {
                let preview: String = sentence.chars().take(50).collect();
                warn!("Could not find sentence match: '{}...'", preview);
                continue;
            };

            let context = match sentences.get(index + 1) {
                Some(next) => format!("{}. {}", sentence, next.trim()),
                None => sentence.clone(),
            };
            contexts.push(context);
        }

        if !contexts.is_empty() {
            snippets.insert(category, contexts.join(". "));
        }
    }

    CategoryContext {
        full_text: clean_full_text(full_text),
        snippets,
    }
}

pub struct AnnotateTask;

#[async_trait]
impl Task for AnnotateTask {
    async fn run(&self, context: Context) -> Result<TaskResult> {
        let mut document: DocumentRun = context
            .get(session_keys::DOCUMENT)
            .await
            .ok_or_else(|| GraphError::ContextError("Document not found in context".to_string()))?;

        let text = document
            .cleansed_text
            .as_deref()
            .ok_or_else(|| GraphError::ContextError("Cleansed text not found".to_string()))?;

        let annotation = annotate(text);
        info!(
            run_id = %document.run_id,
            categories = annotation.snippets.len(),
            "Annotated category contexts"
        );

        document.context = Some(annotation);
        context.set(session_keys::DOCUMENT, document).await?;

        Ok(TaskResult::new_with_status(
            None,
            NextAction::Continue,
            Some("Category contexts annotated".to_string()),
        ))
    }
}
