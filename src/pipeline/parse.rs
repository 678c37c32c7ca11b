//! Cleanup and strict parsing of the structuring model's reply.
//!
//! Models asked for bare JSON still sometimes wrap it in a ```` ```json ````
//! fence, prepend a sentence, or emit CRLF line endings and zero-width
//! characters. A few deterministic cleanup rules run first; what remains must
//! then parse as the content-block schema or the candidate is counted as
//! failed.
//!
//! Rules (applied in order):
//! 1. Strip an outer markdown fence
//! 2. Normalise line endings (CRLF → LF)
//! 3. Cut any prose before the first `{` and after the last `}`
//! 4. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens) between
//!    JSON tokens; string values keep theirs

use crate::error::CandidateError;
use crate::model::{ContentBlock, StructuredContent};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RawStructure {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    author: Option<String>,
    content: Vec<RawBlock>,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    #[serde(rename = "type")]
    kind: RawKind,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawKind {
    Text,
    ImagePrompt,
}

/// Parse a model reply into [`StructuredContent`].
///
/// A missing or blank `title`/`author` falls back to the given values. Blocks
/// keep the order the model emitted; none carries a resolved image.
pub fn parse_structure(
    raw: &str,
    fallback_title: &str,
    fallback_author: &str,
) -> Result<StructuredContent, CandidateError> {
    let cleaned = clean_reply(raw);
    if cleaned.is_empty() {
        return Err(CandidateError::Malformed("empty response".into()));
    }

    let parsed: RawStructure =
        serde_json::from_str(&cleaned).map_err(|e| CandidateError::Malformed(e.to_string()))?;

    if parsed.content.is_empty() {
        return Err(CandidateError::Malformed("'content' array is empty".into()));
    }

    let blocks = parsed
        .content
        .into_iter()
        .map(|b| match b.kind {
            RawKind::Text => ContentBlock::text(b.data),
            RawKind::ImagePrompt => ContentBlock::image_prompt(b.data),
        })
        .collect();

    Ok(StructuredContent {
        title: non_blank(parsed.title).unwrap_or_else(|| fallback_title.to_string()),
        author: non_blank(parsed.author).unwrap_or_else(|| fallback_author.to_string()),
        blocks,
    })
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty())
}

/// Apply all cleanup rules to a raw reply.
pub fn clean_reply(input: &str) -> String {
    let s = strip_json_fences(input);
    let s = normalise_line_endings(&s);
    let s = trim_to_object(&s);
    remove_invisible_chars(s)
}

// ── Rule 1: Strip outer markdown fences ──────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json|JSON)?[ \t]*\r?\n(.*?)\r?\n?```\s*$").unwrap());

fn strip_json_fences(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Cut surrounding prose ────────────────────────────────────────────

fn trim_to_object(input: &str) -> &str {
    match (input.find('{'), input.rfind('}')) {
        (Some(start), Some(end)) if start < end => &input[start..=end],
        _ => input.trim(),
    }
}

// ── Rule 4: Remove invisible Unicode characters ─────────────────────────────

const INVISIBLE: [char; 5] = ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{2060}'];

/// Drop invisible characters outside string literals.
fn remove_invisible_chars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;
    for ch in input.chars() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
        } else if ch == '"' {
            in_string = true;
        } else if INVISIBLE.contains(&ch) {
            continue;
        }
        out.push(ch);
    }
    out.trim().to_string()
}
