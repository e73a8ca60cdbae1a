use std::sync::Arc;

use agent_client_protocol::{Client, ContentChunk, SessionId, SessionNotification, SessionUpdate};
use tracing::error;

/// Outbound notifications for one session.
#[derive(Clone)]
pub struct SessionClient {
    session_id: SessionId,
    client: Arc<dyn Client>,
}

impl SessionClient {
    pub fn new(session_id: SessionId, client: Arc<dyn Client>) -> Self {
        Self { session_id, client }
    }

    /// Delivery failures are logged; a turn never aborts because of them.
    pub async fn send_notification(&self, notification: SessionNotification) {
        if let Err(e) = self.client.session_notification(notification).await {
            error!("Failed to send session notification: {:?}", e);
        }
    }

    pub async fn send_update(&self, update: SessionUpdate) {
        self.send_notification(SessionNotification::new(self.session_id.clone(), update))
            .await;
    }

    pub async fn send_agent_text(&self, text: impl Into<String>) {
        let text = text.into();
        self.send_update(SessionUpdate::AgentMessageChunk(ContentChunk::new(
            text.into(),
        )))
        .await;
    }
}
