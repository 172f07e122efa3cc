//! Classification prompt and lenient response parsing.
//!
//! The prompt asks for a single JSON object. Small local models often wrap
//! it in prose or code fences, use numbers where strings were asked for, or
//! drop fields, so [`parse_classification`] tolerates all of that.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::LlmError;
use crate::types::ClassificationResponse;

/// System prompt for message classification.
pub const CLASSIFY_SYSTEM: &str = r#"You analyse one chat message written by a user to {persona_name}.
Reply with ONE JSON object and nothing else:
{"label": "<one lower-case emotion word, e.g. joy, sadness, anger, fear, curiosity, love, boredom, neutral>",
 "intensity": <number 0.0 to 1.0>,
 "topics": ["<short topic>", ...],
 "key_facts": {"<attribute>": "<value the user stated about themself>"},
 "personality_signals": ["<short trait observation>", ...],
 "inconsistent": <true if the message contradicts the earlier messages, else false>}
Use "neutral" with intensity 0 when no emotion is expressed. Keep topics to at most 3."#;

/// User prompt for message classification.
pub const CLASSIFY_USER: &str = r"Earlier messages from this user (oldest first):
{history}

Message to classify:
{message}";

/// Simple template interpolation for prompts.
///
/// Replaces `{key}` with the corresponding value.
#[must_use]
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{key}}}"), value);
    }
    result
}

/// Render `(system, user)` prompts for classifying `message`.
#[must_use]
pub fn classification_prompt(persona_name: &str, message: &str, history: &[String]) -> (String, String) {
    let history = if history.is_empty() {
        "(none)".to_string()
    } else {
        history
            .iter()
            .map(|h| format!("- {}", h.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let system = render_template(CLASSIFY_SYSTEM, &[("persona_name", persona_name)]);
    let user = render_template(CLASSIFY_USER, &[("history", &history), ("message", message.trim())]);
    (system, user)
}

/// Slice out the outermost `{ ... }` in `text`, if any.
#[must_use]
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse a model answer into a [`ClassificationResponse`].
///
/// # Errors
///
/// Returns [`LlmError::ParseError`] if no JSON object can be found, and
/// [`LlmError::SchemaValidation`] if the object is not a map.
pub fn parse_classification(text: &str) -> Result<ClassificationResponse, LlmError> {
    let raw = extract_json_object(text)
        .ok_or_else(|| LlmError::ParseError(format!("no JSON object in '{text}'")))?;
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| LlmError::ParseError(format!("{e}: raw text: '{raw}'")))?;
    let Value::Object(map) = value else {
        return Err(LlmError::SchemaValidation("expected a JSON object".into()));
    };

    let label = map
        .get("label")
        .or_else(|| map.get("emotion"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "neutral".to_string());

    #[allow(clippy::cast_possible_truncation)]
    let intensity = map
        .get("intensity")
        .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
        .filter(|f| f.is_finite())
        .map_or(0.0, |f| f.clamp(0.0, 1.0) as f32);

    Ok(ClassificationResponse {
        label,
        intensity,
        topics: string_list(map.get("topics")),
        key_facts: string_map(map.get("key_facts")),
        personality_signals: string_list(map.get("personality_signals")),
        inconsistent: map.get("inconsistent").is_some_and(truthy),
    })
}

fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(scalar_text).collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    let Some(Value::Object(map)) = value else {
        return BTreeMap::new();
    };
    map.iter()
        .filter_map(|(k, v)| {
            let key = k.trim();
            if key.is_empty() {
                return None;
            }
            scalar_text(v).map(|v| (key.to_string(), v))
        })
        .collect()
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes"),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_history_and_message() {
        let (system, user) = classification_prompt(
            "Echo",
            "  I got the job!  ",
            &["hi".to_string(), "I have an interview today".to_string()],
        );
        assert!(system.contains("to Echo."));
        assert!(user.contains("- hi\n- I have an interview today"));
        assert!(user.ends_with("I got the job!"));
    }

    #[test]
    fn empty_history_is_marked() {
        let (_, user) = classification_prompt("Echo", "hello", &[]);
        assert!(user.contains("(none)"));
    }

    #[test]
    fn parses_clean_json() {
        let c = parse_classification(
            r#"{"label":"Joy","intensity":0.9,"topics":["work"],"key_facts":{"job":"nurse"},"personality_signals":["optimistic"],"inconsistent":false}"#,
        )
        .unwrap();
        assert_eq!(c.label, "joy");
        assert!((c.intensity - 0.9).abs() < 1e-6);
        assert_eq!(c.topics, vec!["work"]);
        assert_eq!(c.key_facts.get("job").map(String::as_str), Some("nurse"));
        assert_eq!(c.personality_signals, vec!["optimistic"]);
        assert!(!c.inconsistent);
    }

    #[test]
    fn tolerates_prose_and_loose_types() {
        let text = "Sure! Here you go:\n```json\n{\"emotion\": \"sadness\", \"intensity\": \"1.7\", \"topics\": \"family, loss\", \"key_facts\": {\"age\": 34, \"\": \"x\"}, \"inconsistent\": \"yes\"}\n```";
        let c = parse_classification(text).unwrap();
        assert_eq!(c.label, "sadness");
        assert!((c.intensity - 1.0).abs() < f32::EPSILON);
        assert_eq!(c.topics, vec!["family", "loss"]);
        assert_eq!(c.key_facts.len(), 1);
        assert_eq!(c.key_facts.get("age").map(String::as_str), Some("34"));
        assert!(c.inconsistent);
    }

    #[test]
    fn missing_fields_default_to_neutral() {
        let c = parse_classification("{}").unwrap();
        assert_eq!(c, ClassificationResponse::default());
    }

    #[test]
    fn rejects_text_without_object() {
        assert!(matches!(parse_classification("I feel happy"), Err(LlmError::ParseError(_))));
        assert!(matches!(parse_classification("} {"), Err(LlmError::ParseError(_))));
        assert!(matches!(parse_classification("{not json}"), Err(LlmError::ParseError(_))));
    }
}
