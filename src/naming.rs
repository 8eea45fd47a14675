//! Default conversation names
//!
//! A session without a user-assigned name gets one derived from its first
//! user message: `<prefix>-<assistant>-<YYYYMMDD-HHMMSS>`, where the prefix
//! is a short text excerpt or a label for image/file messages. Every part is
//! filesystem safe because the directory backend uses the name as a file id.

use chrono::{DateTime, TimeZone};
use regex::Regex;
use serde_json::Value;
use std::fmt::Display;
use std::sync::OnceLock;

/// Name used when nothing better is known
pub const DEFAULT_CONVERSATION_NAME: &str = "新对话";

/// Prefix for a first message that carries an image
pub const IMAGE_NAME_LABEL: &str = "图片";

/// Prefix for a first message that carries a file
pub const FILE_NAME_LABEL: &str = "文件";

/// Characters of message text kept in a derived name
pub const NAME_TEXT_CHARS: usize = 20;

const FALLBACK_ASSISTANT_CODE: &str = "AI";

fn unsafe_chars_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[\\/:*?"<>|\x00-\x1f\x7f]"#).expect("static pattern"))
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static pattern"))
}

/// Strip characters that are not allowed in file names
///
/// Whitespace runs collapse to one space and leading/trailing dots and
/// spaces are removed.
///
/// # Examples
///
/// ```
/// use sessync::naming::sanitize_file_component;
///
/// assert_eq!(sanitize_file_component(" a/b:c?\n d "), "abc d");
/// ```
pub fn sanitize_file_component(raw: &str) -> String {
    let stripped = unsafe_chars_re().replace_all(raw, "");
    let collapsed = whitespace_re().replace_all(&stripped, " ");
    collapsed
        .trim_matches(|c: char| c == '.' || c.is_whitespace())
        .to_string()
}

/// Content classification of a message, used for naming
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// Message has usable text
    Text(String),
    /// Message carries an image and no text
    Image,
    /// Message carries a file and no text
    File,
    /// Nothing recognizable
    Empty,
}

/// Classify a chat message by its content
pub fn classify_message(message: &Value) -> MessageKind {
    match message.get("content") {
        Some(Value::String(text)) if !text.trim().is_empty() => {
            MessageKind::Text(text.trim().to_string())
        }
        Some(Value::Array(parts)) => {
            let text = parts.iter().find_map(|part| {
                (part.get("type").and_then(Value::as_str) == Some("text"))
                    .then(|| part.get("text").and_then(Value::as_str))
                    .flatten()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
            });
            if let Some(text) = text {
                return MessageKind::Text(text.to_string());
            }

            let has_type = |wanted: &[&str]| {
                parts.iter().any(|part| {
                    part.get("type")
                        .and_then(Value::as_str)
                        .map(|t| wanted.contains(&t))
                        .unwrap_or(false)
                })
            };
            if has_type(&["image_url"]) {
                MessageKind::Image
            } else if has_type(&["file", "input_file"]) {
                MessageKind::File
            } else {
                MessageKind::Empty
            }
        }
        _ => MessageKind::Empty,
    }
}

/// Build the default name for a session from its first user message
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use serde_json::json;
/// use sessync::naming::derive_conversation_name;
///
/// let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
/// let name = derive_conversation_name(&json!({"role": "user", "content": "Plan a trip"}), "Travel", &at);
/// assert_eq!(name, "Plan a trip-Travel-20260304-050607");
/// ```
pub fn derive_conversation_name<Tz>(
    first_user_message: &Value,
    assistant_code: &str,
    at: &DateTime<Tz>,
) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let prefix = match classify_message(first_user_message) {
        MessageKind::Text(text) => {
            let excerpt: String = sanitize_file_component(&text)
                .chars()
                .take(NAME_TEXT_CHARS)
                .collect();
            excerpt.trim().to_string()
        }
        MessageKind::Image => IMAGE_NAME_LABEL.to_string(),
        MessageKind::File => FILE_NAME_LABEL.to_string(),
        MessageKind::Empty => String::new(),
    };
    let prefix = if prefix.is_empty() {
        DEFAULT_CONVERSATION_NAME.to_string()
    } else {
        prefix
    };

    let code = match sanitize_file_component(assistant_code) {
        code if code.is_empty() => FALLBACK_ASSISTANT_CODE.to_string(),
        code => code,
    };

    format!("{}-{}-{}", prefix, code, at.format("%Y%m%d-%H%M%S"))
}
