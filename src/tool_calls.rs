//! Classification and rendering of cursor-agent tool invocations.
//!
//! Every function here is pure and total: argument and result bags come
//! straight from the CLI and may be missing fields or have unexpected shapes,
//! in which case the helpers fall back to generic labels or return `None`.

use agent_client_protocol::{
    Content, ContentBlock, Diff, TextContent, ToolCallContent, ToolCallLocation, ToolKind,
};
use serde_json::Value;

use crate::stream_json::ToolTag;

/// Upper bound on file text echoed back from a read.
pub const READ_CONTENT_MAX_CHARS: usize = 20_000;

pub fn title(tag: &ToolTag, args: &Value) -> String {
    match tag {
        ToolTag::Read => match str_field(args, &["path"]) {
            Some(path) => format!("Read {path}"),
            None => "Read File".to_string(),
        },
        ToolTag::Write => match str_field(args, &["path"]) {
            Some(path) => format!("Write {path}"),
            None => "Write File".to_string(),
        },
        ToolTag::Grep => search_title(pattern_arg(tag, args), search_dir_arg(args), "Search"),
        ToolTag::Glob => search_title(pattern_arg(tag, args), search_dir_arg(args), "Find Files"),
        ToolTag::Shell => match str_field(args, &["command"]) {
            Some(command) => format!("`{command}`"),
            None => "Terminal".to_string(),
        },
        ToolTag::Other(raw) => raw.clone(),
    }
}

fn search_title(pattern: Option<&str>, path: Option<&str>, fallback: &str) -> String {
    match (pattern, path) {
        (Some(pattern), Some(path)) => format!("{pattern} in {path}"),
        (Some(pattern), None) => pattern.to_string(),
        _ => fallback.to_string(),
    }
}

pub fn category(tag: &ToolTag) -> ToolKind {
    match tag {
        ToolTag::Read => ToolKind::Read,
        ToolTag::Write => ToolKind::Edit,
        ToolTag::Grep | ToolTag::Glob => ToolKind::Search,
        ToolTag::Shell => ToolKind::Execute,
        ToolTag::Other(_) => ToolKind::Other,
    }
}

/// File locations touched by a tool call. Locations reported by the result
/// win over the ones named in the arguments.
pub fn locations(args: &Value, result: Option<&Value>) -> Option<Vec<ToolCallLocation>> {
    result
        .and_then(success_payload)
        .and_then(extract_locations)
        .or_else(|| extract_locations(args))
}

fn extract_locations(value: &Value) -> Option<Vec<ToolCallLocation>> {
    let obj = value.as_object()?;
    if let Some(path) = obj
        .get("path")
        .and_then(Value::as_str)
        .filter(|p| !p.is_empty())
    {
        return Some(vec![location(path, line_of(value))]);
    }

    for key in ["paths", "files"] {
        let Some(items) = obj.get(key).and_then(Value::as_array) else {
            continue;
        };
        let found = items
            .iter()
            .filter_map(|item| match item {
                Value::String(path) if !path.is_empty() => Some(location(path, None)),
                Value::Object(_) => item
                    .get("path")
                    .and_then(Value::as_str)
                    .map(|path| location(path, line_of(item))),
                _ => None,
            })
            .collect::<Vec<_>>();
        if !found.is_empty() {
            return Some(found);
        }
    }
    None
}

fn location(path: &str, line: Option<u32>) -> ToolCallLocation {
    ToolCallLocation::new(path).line(line)
}

fn line_of(value: &Value) -> Option<u32> {
    ["line", "lineNumber"]
        .iter()
        .find_map(|key| value.get(key).and_then(Value::as_u64))
        .and_then(|line| u32::try_from(line).ok())
}

/// One-line count summary for grep and glob completions.
pub fn search_summary(tag: &ToolTag, args: &Value, result: Option<&Value>) -> Option<String> {
    let payload = result.and_then(success_payload)?;
    let pattern = pattern_arg(tag, args).or_else(|| pattern_arg(tag, payload))?;
    match tag {
        ToolTag::Grep => {
            let count = count_matches(payload)?;
            let noun = if count == 1 { "match" } else { "matches" };
            Some(format!("Found {count} {noun} for {pattern}"))
        }
        ToolTag::Glob => {
            let count = count_files(payload)?;
            let noun = if count == 1 { "file" } else { "files" };
            Some(format!("Found {count} {noun} matching {pattern}"))
        }
        _ => None,
    }
}

fn count_matches(payload: &Value) -> Option<u64> {
    if let Some(count) = u64_field(payload, &["totalMatchedLines", "totalMatches", "matchCount"]) {
        return Some(count);
    }
    if let Some(matches) = payload.get("matches").and_then(Value::as_array) {
        // Entries are either single hits or per-file groups of hits.
        return Some(
            matches
                .iter()
                .map(|entry| {
                    entry
                        .get("matches")
                        .and_then(Value::as_array)
                        .map_or(1, |hits| hits.len() as u64)
                })
                .sum(),
        );
    }
    if let Some(content) = payload.get("content").filter(|c| c.is_object()) {
        return count_matches(content);
    }
    let workspaces = payload.get("workspaceResults")?.as_object()?;
    workspaces.values().map(count_matches).sum()
}

fn count_files(payload: &Value) -> Option<u64> {
    if let Some(count) = u64_field(payload, &["totalFiles", "fileCount"]) {
        return Some(count);
    }
    if let Some(files) = payload.get("files").and_then(Value::as_array) {
        return Some(files.len() as u64);
    }
    let workspaces = payload.get("workspaceResults")?.as_object()?;
    workspaces.values().map(count_files).sum()
}

/// Whether a completion result reports a failure.
pub fn is_error(result: Option<&Value>) -> bool {
    result
        .and_then(|r| r.get("error"))
        .is_some_and(|e| !e.is_null())
}

/// Rendered content for a completed tool call.
pub fn completion_content(
    tag: &ToolTag,
    args: &Value,
    result: Option<&Value>,
) -> Vec<ToolCallContent> {
    let payload = result.and_then(success_payload);
    match tag {
        ToolTag::Read => payload
            .and_then(|p| str_field(p, &["content"]))
            .or_else(|| str_field(args, &["content"]))
            .map(|text| vec![text_content(truncate_chars(text, READ_CONTENT_MAX_CHARS))])
            .unwrap_or_default(),
        ToolTag::Write => {
            let path =
                str_field(args, &["path"]).or_else(|| payload.and_then(|p| str_field(p, &["path"])));
            let new_text = str_field(args, &["fileText", "contents", "content"]).unwrap_or_default();
            let old_text = str_field(args, &["oldText"])
                .or_else(|| payload.and_then(|p| str_field(p, &["oldText", "beforeFullFileContent"])))
                .map(str::to_string);
            match path {
                Some(path) => vec![ToolCallContent::Diff(
                    Diff::new(path, new_text).old_text(old_text),
                )],
                None if !new_text.is_empty() => vec![text_content(new_text)],
                None => Vec::new(),
            }
        }
        ToolTag::Shell => {
            let output = result.map(shell_payload);
            let stdout = output
                .and_then(|o| str_field(o, &["stdout", "output"]))
                .unwrap_or_default();
            let exit_code = output.and_then(|o| {
                ["exitCode", "exit_code"]
                    .iter()
                    .find_map(|key| o.get(key).and_then(Value::as_i64))
            });
            vec![text_content(render_shell_output(stdout, exit_code))]
        }
        ToolTag::Grep | ToolTag::Glob => search_summary(tag, args, result)
            .map(|summary| vec![text_content(summary)])
            .unwrap_or_default(),
        ToolTag::Other(_) => Vec::new(),
    }
}

pub fn render_shell_output(stdout: &str, exit_code: Option<i64>) -> String {
    let body = if stdout.trim().is_empty() {
        "(no output)"
    } else {
        stdout.trim_end_matches('\n')
    };
    let block = format!("```\n{body}\n```");
    match exit_code {
        Some(code) => format!("Exit code: {code}\n\n{block}"),
        None => block,
    }
}

/// The `success` payload of a result, or the result itself when it carries
/// neither a `success` nor an `error` wrapper.
fn success_payload(result: &Value) -> Option<&Value> {
    if let Some(success) = result.get("success") {
        return Some(success);
    }
    if result.get("error").is_some() {
        return None;
    }
    Some(result)
}

/// Shell failures still carry stdout and the exit code.
fn shell_payload(result: &Value) -> &Value {
    ["success", "failure", "error"]
        .iter()
        .find_map(|key| result.get(key).filter(|v| v.is_object()))
        .unwrap_or(result)
}

fn pattern_arg<'a>(tag: &ToolTag, value: &'a Value) -> Option<&'a str> {
    match tag {
        ToolTag::Glob => str_field(value, &["globPattern", "pattern"]),
        _ => str_field(value, &["pattern"]),
    }
}

fn search_dir_arg(args: &Value) -> Option<&str> {
    str_field(args, &["path", "targetDirectory"])
}

fn str_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| value.get(key).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

fn u64_field(value: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter()
        .find_map(|key| value.get(key).and_then(Value::as_u64))
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

fn text_content(text: impl Into<String>) -> ToolCallContent {
    ToolCallContent::Content(Content::new(ContentBlock::Text(TextContent::new(
        text.into(),
    ))))
}
