//! Parsing the newline-delimited JSON a provider subprocess writes to
//! stdout (§6.3) into a small set of recognized shapes. Any line that
//! doesn't parse, or parses but doesn't match a recognized shape, passes
//! through as raw text — providers are free-form enough that "unknown" is
//! not an error.

const TOOL_RESULT_TRUNCATE: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Text(String),
    ToolUse { name: String, raw: serde_json::Value },
    ToolResult(String),
    Session { session_id: String },
    Done { total_cost_usd: Option<f64>, duration_ms: Option<u64> },
    Error(String),
}

pub fn parse_line(line: &str) -> StreamEvent {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return StreamEvent::Text(String::new());
    }
    let value: serde_json::Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(_) => return StreamEvent::Text(line.to_string()),
    };

    let msg_type = value.get("type").and_then(|v| v.as_str()).unwrap_or("");

    match msg_type {
        "assistant" | "message" => {
            let text = value
                .get("content")
                .and_then(extract_text)
                .or_else(|| value.get("message").and_then(|m| m.get("content")).and_then(extract_text))
                .unwrap_or_default();
            StreamEvent::Text(text)
        }
        "content_block_delta" => {
            let text = value
                .get("delta")
                .filter(|d| d.get("type").and_then(|t| t.as_str()) == Some("text_delta"))
                .and_then(|d| d.get("text"))
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string();
            StreamEvent::Text(text)
        }
        "tool_use" | "tool_call" => {
            let name = tool_call_name(&value).unwrap_or_else(|| "unknown_tool".to_string());
            StreamEvent::ToolUse { name, raw: value }
        }
        "tool_result" | "tool_response" => {
            let content = value
                .get("content")
                .and_then(|c| c.as_str().map(str::to_string).or_else(|| Some(c.to_string())))
                .unwrap_or_default();
            StreamEvent::ToolResult(truncate(&content, TOOL_RESULT_TRUNCATE))
        }
        "result" | "done" | "finish" | "complete" => StreamEvent::Done {
            total_cost_usd: value.get("total_cost_usd").and_then(|v| v.as_f64()),
            duration_ms: value.get("duration_ms").and_then(|v| v.as_u64()),
        },
        "system" if value.get("subtype").and_then(|v| v.as_str()) == Some("init") => {
            match value.get("session_id").and_then(|v| v.as_str()) {
                Some(id) => StreamEvent::Session { session_id: id.to_string() },
                None => StreamEvent::Text(line.to_string()),
            }
        }
        "session" => {
            let id = value
                .get("session_id")
                .or_else(|| value.get("sessionID"))
                .or_else(|| value.get("id"))
                .and_then(|v| v.as_str());
            match id {
                Some(id) => StreamEvent::Session { session_id: id.to_string() },
                None => StreamEvent::Text(line.to_string()),
            }
        }
        "error" => {
            let message = value
                .get("message")
                .or_else(|| value.get("error"))
                .and_then(|v| v.as_str())
                .unwrap_or(trimmed)
                .to_string();
            StreamEvent::Error(message)
        }
        _ => StreamEvent::Text(line.to_string()),
    }
}

fn extract_text(value: &serde_json::Value) -> Option<String> {
    if let Some(s) = value.as_str() {
        return Some(s.to_string());
    }
    if let Some(arr) = value.as_array() {
        let joined: String = arr
            .iter()
            .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("");
        if !joined.is_empty() {
            return Some(joined);
        }
    }
    None
}

/// Some providers nest the tool call as `{"tool_call": {"<Name>ToolCall": {...}}}`.
fn tool_call_name(value: &serde_json::Value) -> Option<String> {
    if let Some(name) = value.get("name").and_then(|v| v.as_str()) {
        return Some(name.to_string());
    }
    let nested = value.get("tool_call")?;
    let key = nested.as_object()?.keys().next()?;
    Some(key.trim_end_matches("ToolCall").to_string())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len - 1).collect();
        format!("{truncated}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_assistant_text() {
        let line = r#"{"type":"assistant","content":"hello"}"#;
        assert_eq!(parse_line(line), StreamEvent::Text("hello".into()));
    }

    #[test]
    fn parses_content_block_delta() {
        let line = r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"hi"}}"#;
        assert_eq!(parse_line(line), StreamEvent::Text("hi".into()));
    }

    #[test]
    fn parses_nested_tool_call_name() {
        let line = r#"{"type":"tool_call","tool_call":{"ReadFileToolCall":{"path":"a.rs"}}}"#;
        match parse_line(line) {
            StreamEvent::ToolUse { name, .. } => assert_eq!(name, "ReadFile"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn truncates_long_tool_result() {
        let content = "x".repeat(500);
        let line = format!(r#"{{"type":"tool_result","content":"{content}"}}"#);
        match parse_line(&line) {
            StreamEvent::ToolResult(text) => assert_eq!(text.chars().count(), 200),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_done_with_cost() {
        let line = r#"{"type":"result","total_cost_usd":0.42,"duration_ms":1500}"#;
        assert_eq!(
            parse_line(line),
            StreamEvent::Done { total_cost_usd: Some(0.42), duration_ms: Some(1500) }
        );
    }

    #[test]
    fn parses_session_init() {
        let line = r#"{"type":"system","subtype":"init","session_id":"abc123"}"#;
        assert_eq!(parse_line(line), StreamEvent::Session { session_id: "abc123".into() });
    }

    #[test]
    fn parses_bare_session_event() {
        let line = r#"{"type":"session","sessionID":"xyz"}"#;
        assert_eq!(parse_line(line), StreamEvent::Session { session_id: "xyz".into() });
    }

    #[test]
    fn unparseable_line_passes_through_as_text() {
        let line = "not json at all";
        assert_eq!(parse_line(line), StreamEvent::Text(line.into()));
    }

    #[test]
    fn unknown_type_passes_through_as_text() {
        let line = r#"{"type":"thinking","text":"pondering"}"#;
        assert_eq!(parse_line(line), StreamEvent::Text(line.into()));
    }
}
