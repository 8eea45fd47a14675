//! Human-readable previews of stored sessions

use serde_json::Value;

/// Maximum characters of a preview before it is truncated
pub const PREVIEW_CHARS: usize = 30;

/// Preview text for a single message
///
/// Prefers the first non-empty text part, then attachment labels, then the
/// names of called tools. Returns an empty string when the message carries
/// nothing displayable.
pub fn message_preview_text(message: &Value) -> String {
    let mut text = match message.get("content") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Array(parts)) => parts_preview(parts),
        _ => String::new(),
    };

    if text.is_empty() {
        if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
            let names: Vec<&str> = calls
                .iter()
                .filter_map(|t| t.get("name").and_then(Value::as_str))
                .collect();
            if !names.is_empty() {
                text = format!("调用工具: {}", names.join(", "));
            }
        }
    }

    let role = message.get("role").and_then(Value::as_str).unwrap_or("");
    let status = message.get("status").and_then(Value::as_str).unwrap_or("");
    if text.is_empty() && role == "assistant" && status == "thinking" {
        text = "思考中...".to_string();
    }

    truncate_preview(&text)
}

fn parts_preview(parts: &[Value]) -> String {
    fn part_type(part: &Value) -> &str {
        part.get("type").and_then(Value::as_str).unwrap_or("")
    }

    if let Some(text) = parts.iter().find_map(|p| {
        (part_type(p) == "text")
            .then(|| p.get("text").and_then(Value::as_str))
            .flatten()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }) {
        return text.to_string();
    }

    if let Some(file) = parts
        .iter()
        .find(|p| matches!(part_type(p), "file" | "input_file"))
    {
        let name = file
            .get("filename")
            .or_else(|| file.get("name"))
            .or_else(|| file.get("file").and_then(|f| f.get("filename")))
            .and_then(Value::as_str)
            .unwrap_or("未知文件");
        return format!("[文件] {}", name);
    }
    if parts.iter().any(|p| part_type(p) == "image_url") {
        return "[图片]".to_string();
    }
    if parts.iter().any(|p| part_type(p) == "input_audio") {
        return "[语音消息]".to_string();
    }
    String::new()
}

fn truncate_preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// Preview of a whole session document
///
/// Uses the last user or assistant message with displayable content from
/// the display history, falling back to the raw history.
pub fn extract_session_preview(session: &Value) -> String {
    let messages = ["chat_show", "history"]
        .iter()
        .find_map(|key| session.get(*key).and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    messages
        .iter()
        .rev()
        .filter(|m| matches!(m.get("role").and_then(Value::as_str), Some("user" | "assistant")))
        .map(message_preview_text)
        .find(|preview| !preview.is_empty())
        .unwrap_or_default()
}
