//! Typed view of the `cursor-agent --output-format stream-json` event stream.
//!
//! Every stdout line of the CLI is one JSON object discriminated by `type`
//! (and, for tool calls and results, by `subtype`). Lines that are not JSON,
//! or that are JSON but miss fields a known event needs, decode to no event
//! and are skipped by the caller.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

/// One decoded stdout line.
#[derive(Debug, Clone)]
pub struct ParsedLine {
    /// Top-level `session_id`, which the CLI may attach to any event.
    pub session_id: Option<String>,
    /// The typed event, or `None` when the payload did not match its type.
    pub event: Option<StreamEvent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    User(MessageEvent),
    Assistant(MessageEvent),
    ToolCall(ToolCallEvent),
    Result(ResultEvent),
    System(SystemEvent),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageEvent {
    pub message: Message,
}

impl MessageEvent {
    /// Concatenated text parts of the message. For assistant events streamed
    /// with partial output this is the cumulative text so far.
    pub fn text(&self) -> String {
        match &self.message.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Other => None,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub content: MessageContent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Parts(Vec::new())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallPhase {
    Started,
    Completed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallEvent {
    pub subtype: ToolCallPhase,
    pub call_id: String,
    pub tool_call: ToolInvocation,
}

/// The single-key `tool_call` object, e.g. `{"readToolCall": {"args": ..., "result": ...}}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct ToolInvocation {
    pub tag: ToolTag,
    pub args: Value,
    pub result: Option<Value>,
}

impl TryFrom<Map<String, Value>> for ToolInvocation {
    type Error = String;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        let Some((key, payload)) = map.into_iter().next() else {
            return Err("tool_call object has no tool entry".to_string());
        };
        let args = payload.get("args").cloned().unwrap_or(Value::Null);
        let result = payload.get("result").filter(|v| !v.is_null()).cloned();
        Ok(Self {
            tag: ToolTag::from_key(&key),
            args,
            result,
        })
    }
}

/// Tool kinds the CLI reports. Unknown kinds keep their raw key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolTag {
    Read,
    Write,
    Grep,
    Glob,
    Shell,
    Other(String),
}

impl ToolTag {
    pub fn from_key(key: &str) -> Self {
        match key {
            "readToolCall" => Self::Read,
            "writeToolCall" => Self::Write,
            "grepToolCall" => Self::Grep,
            "globToolCall" => Self::Glob,
            "shellToolCall" => Self::Shell,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSubtype {
    Success,
    Cancelled,
    Error,
    Failure,
    Refused,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultEvent {
    pub subtype: ResultSubtype,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemEvent {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

/// Decode one stdout line. Returns `None` for blank lines and for anything
/// that is not a JSON object.
pub fn parse_line(line: &str) -> Option<ParsedLine> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(err) => {
            debug!("Skipping non-JSON line from cursor-agent: {err}");
            return None;
        }
    };
    if !value.is_object() {
        debug!("Skipping non-object JSON line from cursor-agent");
        return None;
    }

    let session_id = value
        .get("session_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    let event = match serde_json::from_value::<StreamEvent>(value) {
        Ok(event) => Some(event),
        Err(err) => {
            debug!("Skipping malformed cursor-agent event: {err}");
            None
        }
    };

    Some(ParsedLine { session_id, event })
}
