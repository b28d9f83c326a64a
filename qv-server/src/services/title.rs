//! Project title generation

use tracing::{debug, warn};

use super::llm::{LlmClient, LlmRequest};

pub const MAX_TITLE_CHARS: usize = 60;
const FALLBACK_WORDS: usize = 6;
pub const UNTITLED: &str = "Untitled Project";

const TITLE_SYSTEM_PROMPT: &str = "You name software projects. Reply with a short, descriptive \
title of at most 6 words for the app the user describes. Reply with the title only: no quotes, \
no punctuation at the end, no explanation.";

/// Ask the LLM for a title, falling back to one derived from the prompt
pub async fn generate_title(llm: &dyn LlmClient, prompt: &str) -> String {
    let request = LlmRequest::prompt(Some(TITLE_SYSTEM_PROMPT.to_string()), prompt).with_max_tokens(32);

    match llm.complete(&request).await {
        Ok(response) => match sanitize_title(&response.text) {
            Some(title) => title,
            None => {
                debug!("LLM returned an empty title, using fallback");
                fallback_title(prompt)
            }
        },
        Err(e) => {
            warn!("Title generation failed: {}", e);
            fallback_title(prompt)
        }
    }
}

/// Clean raw LLM output into a title
///
/// First non-empty line, surrounding quotes and trailing punctuation removed,
/// whitespace collapsed, capped at [`MAX_TITLE_CHARS`] characters.
pub fn sanitize_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;

    let quote = |c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '`' | '“' | '”');
    let stripped = line
        .trim_start_matches(quote)
        .trim_end_matches(|c: char| quote(c) || matches!(c, '.' | '!' | '?' | ',' | ';' | ':'));

    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    let title = truncate_chars(&collapsed, MAX_TITLE_CHARS);

    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

/// First six words of the prompt, each capitalized
pub fn fallback_title(prompt: &str) -> String {
    let words: Vec<String> = prompt
        .split_whitespace()
        .take(FALLBACK_WORDS)
        .map(capitalize)
        .collect();

    if words.is_empty() {
        return UNTITLED.to_string();
    }

    truncate_chars(&words.join(" "), MAX_TITLE_CHARS)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].trim_end().to_string(),
        None => s.to_string(),
    }
}
