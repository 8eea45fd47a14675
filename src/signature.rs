//! Bounded-size session fingerprints for cheap change detection
//!
//! Signatures are deliberately approximate: long text is reduced to its
//! length plus its last 48 characters, and a whole session is reduced to its
//! scalar settings, the lengths of its message lists and the signature of the
//! last message in each list. Two sessions that differ only in an earlier
//! message with identical lengths and tails produce the same signature.

use serde_json::{json, Map, Value};

/// Number of trailing characters kept by [`summarize_text`].
pub const SIGNATURE_TAIL_CHARS: usize = 48;

const MESSAGE_FIELD_SEPARATOR: &str = "~";
const PART_SEPARATOR: &str = "|";

/// Produce a key-order independent string form of a JSON value
///
/// Object keys are sorted, array order is preserved and primitives use their
/// JSON form.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use sessync::signature::canonicalize;
///
/// assert_eq!(
///     canonicalize(&json!({"a": 1, "b": 2})),
///     canonicalize(&json!({"b": 2, "a": 1}))
/// );
/// assert_ne!(canonicalize(&json!([1, 2])), canonicalize(&json!([2, 1])));
/// ```
pub fn canonicalize(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", body.join(","))
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body: Vec<String> = keys
                .into_iter()
                .map(|key| format!("{}:{}", Value::String(key.clone()), canonicalize(&map[key])))
                .collect();
            format!("{{{}}}", body.join(","))
        }
        primitive => primitive.to_string(),
    }
}

/// Summarize text as `"<length>:<last 48 characters>"`
///
/// Length is counted in characters.
///
/// # Examples
///
/// ```
/// use sessync::signature::summarize_text;
///
/// assert_eq!(summarize_text("hello"), "5:hello");
/// ```
pub fn summarize_text(value: &str) -> String {
    let length = value.chars().count();
    let tail: String = value
        .chars()
        .skip(length.saturating_sub(SIGNATURE_TAIL_CHARS))
        .collect();
    format!("{}:{}", length, tail)
}

/// Signature of one chat message
///
/// Joins id, role, status, the reasoning summary, the tool call summary and
/// the content summary. A missing message yields an empty string.
pub fn build_message_signature(message: &Value) -> String {
    if message.is_null() {
        return String::new();
    }

    [
        text_field(message, "id"),
        text_field(message, "role"),
        text_field(message, "status"),
        summarize_text(&text_field(message, "reasoning_content")),
        summarize_tool_calls(message.get("tool_calls")),
        summarize_content(message.get("content")),
    ]
    .join(MESSAGE_FIELD_SEPARATOR)
}

/// Signature of a whole session document
///
/// Covers the scalar settings, both message list lengths and the last message
/// of each list. Runs in constant time with respect to history length.
pub fn build_session_snapshot_signature(session: &Value) -> String {
    let empty = Map::new();
    let safe = session.as_object().unwrap_or(&empty);

    let history = array_field(safe, "history");
    let chat_show = array_field(safe, "chat_show");

    let last_history = history.last().map(build_message_signature).unwrap_or_default();
    let last_chat_show = chat_show
        .last()
        .map(build_message_signature)
        .unwrap_or_default();

    let prompt_model = safe
        .get("currentPromptConfig")
        .map(|config| text_field(config, "model"))
        .unwrap_or_default();

    let reduced = json!({
        "anywhere_history": is_truthy(safe.get("anywhere_history")),
        "CODE": text_of(safe.get("CODE")),
        "conversationName": text_of(safe.get("conversationName")),
        "basic_msg": truthy_or_null(safe.get("basic_msg")),
        "selectedVoice": truthy_or_null(safe.get("selectedVoice")),
        "model": text_of(safe.get("model")),
        "currentPromptConfigModel": prompt_model,
        "isAutoApproveTools": is_truthy(safe.get("isAutoApproveTools")),
        "activeMcpServerIds": Value::Array(array_field(safe, "activeMcpServerIds").to_vec()),
        "activeSkillIds": Value::Array(array_field(safe, "activeSkillIds").to_vec()),
        "historyLength": history.len(),
        "chatShowLength": chat_show.len(),
        "lastHistorySignature": last_history,
        "lastChatShowSignature": last_chat_show,
    });

    canonicalize(&reduced)
}

/// Key used to collapse near-simultaneous first saves of the same snapshot
pub fn build_idempotency_key(
    assistant_code: &str,
    conversation_name: &str,
    snapshot_signature: &str,
) -> String {
    canonicalize(&json!({
        "assistantCode": assistant_code,
        "conversationName": conversation_name,
        "snapshotSignature": snapshot_signature,
    }))
}

fn summarize_content(content: Option<&Value>) -> String {
    let content = match content {
        Some(value) if is_truthy(Some(value)) => value,
        _ => return "null".to_string(),
    };

    match content {
        Value::String(text) => format!("str:{}", summarize_text(text)),
        Value::Array(parts) => parts
            .iter()
            .map(summarize_part)
            .collect::<Vec<_>>()
            .join(PART_SEPARATOR),
        other => format!("obj:{}", summarize_text(&other.to_string())),
    }
}

fn summarize_part(part: &Value) -> String {
    match part.get("type").and_then(Value::as_str) {
        Some("text") => format!("text:{}", summarize_text(&text_field(part, "text"))),
        Some("image_url") => {
            let url = part
                .get("image_url")
                .map(|image| text_field(image, "url"))
                .unwrap_or_default();
            format!("img:{}", summarize_text(&url))
        }
        Some("file") => {
            let filename = part
                .get("file")
                .map(|file| text_field(file, "filename"))
                .unwrap_or_default();
            format!("file:{}", filename)
        }
        Some("input_audio") => {
            let audio = part.get("input_audio");
            let format = audio.map(|a| text_field(a, "format")).unwrap_or_default();
            let data_len = audio
                .map(|a| text_field(a, "data").chars().count())
                .unwrap_or(0);
            format!("audio:{}:{}", format, data_len)
        }
        Some(other) => format!("other:{}", other),
        None => "other:unknown".to_string(),
    }
}

fn summarize_tool_calls(tool_calls: Option<&Value>) -> String {
    let calls = match tool_calls.and_then(Value::as_array) {
        Some(calls) if !calls.is_empty() => calls,
        _ => return String::new(),
    };

    calls
        .iter()
        .map(|tool| {
            [
                text_field(tool, "id"),
                text_field(tool, "name"),
                text_field(tool, "approvalStatus"),
                summarize_text(&text_field(tool, "result")),
            ]
            .join(":")
        })
        .collect::<Vec<_>>()
        .join(PART_SEPARATOR)
}

fn array_field<'a>(map: &'a Map<String, Value>, key: &str) -> &'a [Value] {
    map.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn text_field(value: &Value, key: &str) -> String {
    text_of(value.get(key))
}

/// Loose string form of an optional field; falsy values become empty.
pub(crate) fn text_of(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(v) if is_truthy(Some(v)) => v.to_string(),
        _ => String::new(),
    }
}

/// JSON truthiness: null, false, 0, and the empty string are falsy.
pub(crate) fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

fn truthy_or_null(value: Option<&Value>) -> Value {
    match value {
        Some(v) if is_truthy(Some(v)) => v.clone(),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with(history: Value, chat_show: Value) -> Value {
        json!({
            "CODE": "AI",
            "conversationName": "demo",
            "model": "gpt-4o",
            "history": history,
            "chat_show": chat_show,
        })
    }

    #[test]
    fn test_canonicalize_ignores_key_order() {
        assert_eq!(
            canonicalize(&json!({"a": 1, "b": 2})),
            canonicalize(&json!({"b": 2, "a": 1}))
        );
    }

    #[test]
    fn test_canonicalize_preserves_array_order() {
        assert_ne!(canonicalize(&json!([1, 2])), canonicalize(&json!([2, 1])));
    }

    #[test]
    fn test_canonicalize_nested_and_primitives() {
        let value = json!({"z": [true, null, "x"], "a": {"d": 1.5, "c": "q"}});
        assert_eq!(
            canonicalize(&value),
            r#"{"a":{"c":"q","d":1.5},"z":[true,null,"x"]}"#
        );
    }

    #[test]
    fn test_summarize_text_short_and_long() {
        assert_eq!(summarize_text(""), "0:");
        let long = "x".repeat(100) + "tail";
        let summary = summarize_text(&long);
        assert!(summary.starts_with("104:"));
        assert_eq!(summary.len(), "104:".len() + SIGNATURE_TAIL_CHARS);
        assert!(summary.ends_with("tail"));
    }

    #[test]
    fn test_summarize_text_counts_characters() {
        assert_eq!(summarize_text("新对话"), "3:新对话");
    }

    #[test]
    fn test_message_signature_for_plain_text() {
        let message = json!({"id": "m1", "role": "user", "content": "hi"});
        assert_eq!(build_message_signature(&message), "m1~user~~0:~~str:2:hi");
    }

    #[test]
    fn test_message_signature_for_structured_parts() {
        let message = json!({
            "id": "m2",
            "role": "user",
            "content": [
                {"type": "text", "text": "look"},
                {"type": "image_url", "image_url": {"url": "data:abc"}},
                {"type": "file", "file": {"filename": "a.pdf"}},
                {"type": "input_audio", "input_audio": {"format": "wav", "data": "abcd"}},
                {"type": "video"}
            ]
        });
        let signature = build_message_signature(&message);
        assert!(signature.ends_with(
            "text:4:look|img:8:data:abc|file:a.pdf|audio:wav:4|other:video"
        ));
    }

    #[test]
    fn test_message_signature_includes_tool_calls() {
        let message = json!({
            "id": "m3",
            "role": "assistant",
            "tool_calls": [{"id": "t1", "name": "search", "approvalStatus": "approved", "result": "ok"}],
            "content": null
        });
        assert_eq!(
            build_message_signature(&message),
            "m3~assistant~~0:~t1:search:approved:2:ok~null"
        );
    }

    #[test]
    fn test_message_signature_of_null_is_empty() {
        assert_eq!(build_message_signature(&Value::Null), "");
    }

    #[test]
    fn test_snapshot_signature_is_deterministic() {
        let session = session_with(
            json!([{"role": "user", "content": "a"}]),
            json!([{"role": "user", "content": "a"}]),
        );
        assert_eq!(
            build_session_snapshot_signature(&session),
            build_session_snapshot_signature(&session.clone())
        );
    }

    #[test]
    fn test_snapshot_signature_changes_with_last_message() {
        let a = session_with(json!([{"content": "one"}]), json!([]));
        let b = session_with(json!([{"content": "two"}]), json!([]));
        assert_ne!(
            build_session_snapshot_signature(&a),
            build_session_snapshot_signature(&b)
        );
    }

    #[test]
    fn test_snapshot_signature_changes_with_scalar_fields() {
        let base = session_with(json!([]), json!([]));
        let base_sig = build_session_snapshot_signature(&base);

        for (key, value) in [
            ("CODE", json!("Other")),
            ("conversationName", json!("renamed")),
            ("model", json!("other-model")),
            ("isAutoApproveTools", json!(true)),
            ("activeSkillIds", json!(["s1"])),
            ("activeMcpServerIds", json!(["m1"])),
        ] {
            let mut changed = base.clone();
            changed[key] = value;
            assert_ne!(
                build_session_snapshot_signature(&changed),
                base_sig,
                "changing {} must change the signature",
                key
            );
        }
    }

    #[test]
    fn test_snapshot_signature_ignores_earlier_messages() {
        // Accepted trade-off: only lengths and the tail are observed.
        let a = session_with(json!([{"content": "x"}, {"content": "same"}]), json!([]));
        let b = session_with(json!([{"content": "y"}, {"content": "same"}]), json!([]));
        assert_eq!(
            build_session_snapshot_signature(&a),
            build_session_snapshot_signature(&b)
        );
    }

    #[test]
    fn test_snapshot_signature_of_non_object() {
        let sig = build_session_snapshot_signature(&Value::Null);
        assert!(sig.contains(r#""historyLength":0"#));
    }

    #[test]
    fn test_idempotency_key_is_canonical() {
        let key = build_idempotency_key("AI", "name", "sig");
        assert_eq!(
            key,
            r#"{"assistantCode":"AI","conversationName":"name","snapshotSignature":"sig"}"#
        );
    }
}
