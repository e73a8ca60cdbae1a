use agent_client_protocol::{
    BlobResourceContents, ContentBlock, EmbeddedResource, EmbeddedResourceResource, ResourceLink,
    TextContent, TextResourceContents,
};
use itertools::Itertools;

use crate::session::AgentMode;

pub const PLAN_MODE_DIRECTIVE: &str = "You are in plan mode. Investigate as needed and reply \
with a step-by-step plan, but do not edit files or run commands that change anything until the \
user approves the plan.";

/// Text handed to `cursor-agent` as its positional prompt argument.
pub fn build_turn_prompt(mode: AgentMode, blocks: &[ContentBlock]) -> String {
    let directive = (mode == AgentMode::Plan).then(|| PLAN_MODE_DIRECTIVE.to_string());
    directive
        .into_iter()
        .chain(prompt_segments(blocks))
        .join("\n\n")
}

fn prompt_segments(blocks: &[ContentBlock]) -> Vec<String> {
    let mut parts: Vec<String> = blocks
        .iter()
        .map(|block| match block {
            ContentBlock::Text(TextContent { text, .. }) => text.clone(),
            ContentBlock::Resource(EmbeddedResource {
                resource: EmbeddedResourceResource::TextResourceContents(TextResourceContents {
                    text,
                    ..
                }),
                ..
            }) => text.clone(),
            ContentBlock::Resource(EmbeddedResource {
                resource: EmbeddedResourceResource::BlobResourceContents(BlobResourceContents {
                    uri,
                    ..
                }),
                ..
            }) => uri.clone(),
            ContentBlock::ResourceLink(ResourceLink { uri, .. }) => uri.clone(),
            // The CLI only takes text; keep a marker so the request still reads sensibly.
            ContentBlock::Image(_) => "[image omitted]".to_string(),
            ContentBlock::Audio(_) => "[audio omitted]".to_string(),
            _ => "[unsupported content omitted]".to_string(),
        })
        .collect();

    while parts.last().is_some_and(|p| p.trim().is_empty()) {
        parts.pop();
    }
    parts
}
