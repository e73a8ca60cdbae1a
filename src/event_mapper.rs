//! Translation of cursor-agent stream events into ACP session notifications.

use agent_client_protocol::{
    ContentChunk, SessionId, SessionNotification, SessionUpdate, ToolCall, ToolCallId,
    ToolCallStatus, ToolCallUpdate, ToolCallUpdateFields,
};

use crate::{
    stream_json::{StreamEvent, ToolCallEvent, ToolCallPhase},
    tool_calls,
};

/// Map one event to the notifications it produces.
///
/// `last_assistant_text` is the cumulative assistant text already forwarded
/// in this turn; the caller owns it and updates it after each assistant event.
pub fn map_event(
    session_id: &SessionId,
    event: &StreamEvent,
    last_assistant_text: &str,
) -> Vec<SessionNotification> {
    let updates = match event {
        // The client already has the prompt it sent.
        StreamEvent::User(_) => Vec::new(),
        StreamEvent::Assistant(message) => {
            let text = message.text();
            text_delta(last_assistant_text, &text)
                .map(|delta| {
                    vec![SessionUpdate::AgentMessageChunk(ContentChunk::new(
                        delta.to_string().into(),
                    ))]
                })
                .unwrap_or_default()
        }
        StreamEvent::ToolCall(tool_call) => match tool_call.subtype {
            ToolCallPhase::Started => tool_call_started(tool_call),
            ToolCallPhase::Completed => tool_call_completed(tool_call),
        },
        // Consumed by the turn runner.
        StreamEvent::Result(_) | StreamEvent::System(_) | StreamEvent::Unknown => Vec::new(),
    };

    updates
        .into_iter()
        .map(|update| SessionNotification::new(session_id.clone(), update))
        .collect()
}

/// The part of `current` that has not been sent yet.
///
/// When `current` extends `previous` only the suffix is returned. Anything
/// else is treated as a restarted message and returned whole.
pub fn text_delta<'a>(previous: &str, current: &'a str) -> Option<&'a str> {
    if current.is_empty() || current == previous {
        return None;
    }
    let delta = current.strip_prefix(previous).unwrap_or(current);
    (!delta.is_empty()).then_some(delta)
}

fn tool_call_started(event: &ToolCallEvent) -> Vec<SessionUpdate> {
    let invocation = &event.tool_call;
    let tool_call_id = ToolCallId::new(event.call_id.clone());

    let mut tool_call = ToolCall::new(
        tool_call_id.clone(),
        tool_calls::title(&invocation.tag, &invocation.args),
    )
    .kind(tool_calls::category(&invocation.tag))
    .status(ToolCallStatus::Pending)
    .raw_input(invocation.args.clone());
    if let Some(locations) = tool_calls::locations(&invocation.args, None) {
        tool_call = tool_call.locations(locations);
    }

    vec![
        SessionUpdate::ToolCall(tool_call),
        SessionUpdate::ToolCallUpdate(ToolCallUpdate::new(
            tool_call_id,
            ToolCallUpdateFields::new().status(ToolCallStatus::InProgress),
        )),
    ]
}

fn tool_call_completed(event: &ToolCallEvent) -> Vec<SessionUpdate> {
    let invocation = &event.tool_call;
    let result = invocation.result.as_ref();

    let status = if tool_calls::is_error(result) {
        ToolCallStatus::Failed
    } else {
        ToolCallStatus::Completed
    };

    let mut fields = ToolCallUpdateFields::new().status(status);
    if let Some(result) = result {
        fields = fields.raw_output(result.clone());
    }
    if let Some(locations) = tool_calls::locations(&invocation.args, result) {
        fields = fields.locations(locations);
    }
    let content = tool_calls::completion_content(&invocation.tag, &invocation.args, result);
    if !content.is_empty() {
        fields = fields.content(content);
    }

    vec![SessionUpdate::ToolCallUpdate(ToolCallUpdate::new(
        ToolCallId::new(event.call_id.clone()),
        fields,
    ))]
}
