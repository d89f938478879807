use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tracing::info;

use crate::flow::{Context, GraphError, NextAction, Result, Task, TaskResult};
use crate::models::DocumentRun;
use crate::schema::ABBREVIATIONS;

use super::session_keys;

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Anything outside word characters, whitespace and `-.,/():`.
static DISALLOWED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s\-.,/():]").expect("valid regex"));

/// Whole-word, case-insensitive matchers in declaration order.
static ABBREVIATION_RES: LazyLock<Vec<(Regex, String)>> = LazyLock::new(|| {
    ABBREVIATIONS
        .iter()
        .map(|(abbr, full)| {
            let escaped = regex::escape(abbr);
            // A trailing word boundary cannot follow punctuation like `w/`;
            // those forms swallow the following space and re-emit one.
            let ends_in_word = abbr.chars().last().is_some_and(char::is_alphanumeric);
            if ends_in_word {
                let re = Regex::new(&format!(r"(?i)\b{escaped}\b")).expect("valid regex");
                (re, (*full).to_string())
            } else {
                let re = Regex::new(&format!(r"(?i)\b{escaped}\s*")).expect("valid regex");
                (re, format!("{full} "))
            }
        })
        .collect()
});

/// Clean recognized text: strip characters outside the whitelist, collapse
/// whitespace, expand medical abbreviations and trim.
///
/// Expansions are applied in a single pass over the table and never re-scanned,
/// so running the function on its own output changes nothing.
pub fn cleanse(text: &str) -> String {
    let text = DISALLOWED_RE.replace_all(text, "");
    let mut text = WHITESPACE_RE.replace_all(&text, " ").into_owned();

    for (re, full) in ABBREVIATION_RES.iter() {
        // `NoExpand` keeps `$` in expansions literal
        text = re
            .replace_all(&text, regex::NoExpand(full.as_str()))
            .into_owned();
    }

    text.trim().to_string()
}

pub struct NormalizeTask;

#[async_trait]
impl Task for NormalizeTask {
    async fn run(&self, context: Context) -> Result<TaskResult> {
        let mut document: DocumentRun = context
            .get(session_keys::DOCUMENT)
            .await
            .ok_or_else(|| GraphError::ContextError("Document not found in context".to_string()))?;

        let raw_text = document
            .raw_text
            .as_deref()
            .ok_or_else(|| GraphError::ContextError("Raw text not found".to_string()))?;

        let cleansed = cleanse(raw_text);
        info!(
            run_id = %document.run_id,
            raw_chars = raw_text.len(),
            cleansed_chars = cleansed.len(),
            "Normalized recognized text"
        );

        document.cleansed_text = Some(cleansed);
        context.set(session_keys::DOCUMENT, document).await?;

        Ok(TaskResult::new_with_status(
            None,
            NextAction::Continue,
            Some("Text normalized".to_string()),
        ))
    }
}
