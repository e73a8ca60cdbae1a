//! Shared fixtures for async tests.

use std::path::Path;

use agent_client_protocol::{
    Client, ContentBlock, ContentChunk, Error, RequestPermissionOutcome,
    RequestPermissionRequest, RequestPermissionResponse, SelectedPermissionOutcome,
    SessionNotification, SessionUpdate, TextContent,
};

use crate::config::AgentConfig;

pub(crate) struct StubClient {
    pub notifications: std::sync::Mutex<Vec<SessionNotification>>,
}

impl StubClient {
    pub fn new() -> Self {
        StubClient {
            notifications: std::sync::Mutex::default(),
        }
    }

    pub fn updates(&self) -> Vec<SessionUpdate> {
        self.notifications
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.update.clone())
            .collect()
    }

    pub fn agent_texts(&self) -> Vec<String> {
        self.updates()
            .into_iter()
            .filter_map(|update| match update {
                SessionUpdate::AgentMessageChunk(ContentChunk {
                    content: ContentBlock::Text(TextContent { text, .. }),
                    ..
                }) => Some(text),
                _ => None,
            })
            .collect()
    }
}

#[async_trait::async_trait(?Send)]
impl Client for StubClient {
    async fn request_permission(
        &self,
        _args: RequestPermissionRequest,
    ) -> Result<RequestPermissionResponse, Error> {
        Ok(RequestPermissionResponse::new(
            RequestPermissionOutcome::Selected(SelectedPermissionOutcome::new("approved")),
        ))
    }

    async fn session_notification(&self, args: SessionNotification) -> Result<(), Error> {
        self.notifications.lock().unwrap().push(args);
        Ok(())
    }
}

/// Write an executable `/bin/sh` script standing in for `cursor-agent` and
/// return a config that launches it.
#[cfg(unix)]
pub(crate) fn fake_cursor_agent(dir: &Path, body: &str) -> AgentConfig {
    use std::io::Write as _;
    use std::os::unix::fs::PermissionsExt as _;

    let path = dir.join("cursor-agent");
    {
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{body}").unwrap();
        file.sync_all().unwrap();
    }
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

    AgentConfig {
        executable: path.to_string_lossy().into_owned(),
        extra_args: Vec::new(),
    }
}
