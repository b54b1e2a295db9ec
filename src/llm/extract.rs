//! Structured-output extraction from LLM responses
//!
//! The prompt contract asks for exactly one JSON object or one fenced YAML
//! document with no prose outside it. Models drift anyway, so extraction is
//! defensive: reasoning blocks are stripped, then a bracket-balanced scan
//! pulls the first complete object out of whatever surrounds it.

use serde_json::Value;

/// Strip `<think>...</think>` reasoning blocks some models emit before the
/// answer. Unclosed tags drop everything up to the tag.
pub fn strip_reasoning(text: &str) -> &str {
    let lower = text.to_lowercase();
    if let Some(end) = lower.find("</think>") {
        return text[end + "</think>".len()..].trim();
    }
    if let Some(start) = lower.find("<think>") {
        return text[..start].trim();
    }
    text.trim()
}

/// Extract the first balanced JSON object from free-form text.
pub fn extract_json(text: &str) -> Option<Value> {
    let text = strip_reasoning(text);
    let bytes = text.as_bytes();
    let start = bytes.iter().position(|&b| b == b'{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[start..=start + offset];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract a YAML document: fenced block preferred, otherwise the whole
/// response if it parses as a YAML mapping.
pub fn extract_yaml(text: &str) -> Option<String> {
    let text = strip_reasoning(text);

    if let Some(block) = fenced_block(text, "```yaml").or_else(|| fenced_block(text, "```")) {
        if serde_yaml::from_str::<serde_yaml::Value>(&block).is_ok() {
            return Some(block);
        }
    }

    match serde_yaml::from_str::<serde_yaml::Value>(text) {
        Ok(serde_yaml::Value::Mapping(_)) => Some(text.to_string()),
        _ => None,
    }
}

fn fenced_block(text: &str, fence: &str) -> Option<String> {
    let start = text.find(fence)? + fence.len();
    let rest = text[start..].trim_start_matches(['\r', '\n']);
    let end = rest.find("```")?;
    Some(rest[..end].trim_end().to_string())
}
