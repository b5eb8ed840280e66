//! Directive parsing from raw model output.
//!
//! The recognized syntax is anchored: the whole trimmed output must be a
//! directive, either bare JSON or inside exactly one ```tool / ```json
//! fence. A directive is `{"name": ..., "arguments": {...}}` (arguments
//! optional, unknown keys rejected) or a non-empty array of them.
//!
//! Anything else is a final answer, including otherwise valid JSON that is
//! surrounded by prose. When in doubt, the output is shown to the user
//! rather than executed.

use chatrelay_core::tool::{Arguments, ToolDirective};
use serde::Deserialize;

const FENCE: &str = "```";
const FENCE_LANGS: [&str; 2] = ["tool", "json"];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDirective {
    name: String,
    #[serde(default)]
    arguments: Option<Arguments>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPayload {
    One(RawDirective),
    Many(Vec<RawDirective>),
}

/// Parse the directives in `output`, or `None` when it is a final answer.
pub fn parse_directives(output: &str) -> Option<Vec<ToolDirective>> {
    let trimmed = output.trim();
    let body = match fenced_body(trimmed) {
        Some(body) => body,
        None if trimmed.starts_with(FENCE) => return None,
        None => trimmed,
    };
    parse_payload(body.trim())
}

/// Body of a single fenced block spanning the whole text.
fn fenced_body(text: &str) -> Option<&str> {
    let rest = text.strip_prefix(FENCE)?;
    let (lang, rest) = rest.split_once('\n')?;
    if !FENCE_LANGS.contains(&lang.trim().to_ascii_lowercase().as_str()) {
        return None;
    }
    let body = rest.strip_suffix(FENCE)?;
    // A second fence inside means more than one block
    if body.contains(FENCE) {
        return None;
    }
    Some(body)
}

fn parse_payload(text: &str) -> Option<Vec<ToolDirective>> {
    if !(text.starts_with('{') || text.starts_with('[')) {
        return None;
    }

    let raw = match serde_json::from_str::<RawPayload>(text).ok()? {
        RawPayload::One(d) => vec![d],
        RawPayload::Many(list) if !list.is_empty() => list,
        RawPayload::Many(_) => return None,
    };

    raw.into_iter()
        .map(|d| {
            let name = d.name.trim();
            if name.is_empty() {
                None
            } else {
                Some(ToolDirective::new(name, d.arguments.unwrap_or_default()))
            }
        })
        .collect()
}
