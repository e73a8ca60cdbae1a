use agent_client_protocol::{
    Agent, AgentCapabilities, AuthMethod, AuthenticateRequest, AuthenticateResponse,
    AvailableCommandsUpdate, CancelNotification, Client, CurrentModeUpdate, Error,
    Implementation, InitializeRequest, InitializeResponse, ListSessionsRequest,
    ListSessionsResponse, LoadSessionRequest, LoadSessionResponse, ModelId, ModelInfo,
    NewSessionRequest, NewSessionResponse, PromptCapabilities, PromptRequest, PromptResponse,
    ProtocolVersion, SessionCapabilities, SessionId, SessionInfo, SessionListCapabilities,
    SessionModelState, SessionUpdate, SetSessionConfigOptionRequest,
    SetSessionConfigOptionResponse, SetSessionModeRequest, SetSessionModeResponse,
    SetSessionModelRequest, SetSessionModelResponse,
};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    ACP_CLIENT,
    config::{AgentConfig, TERMINATE_GRACE},
    session::{AgentMode, Session, SessionRegistry},
    session_client::SessionClient,
    turn::run_turn,
};

const MODEL_ID: &str = "auto";

pub struct AcpAgent {
    config: AgentConfig,
    sessions: SessionRegistry,
    /// Overrides the process-wide connection in tests.
    client: Option<Arc<dyn Client>>,
}

impl AcpAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            sessions: SessionRegistry::new(),
            client: None,
        }
    }

    #[cfg(test)]
    fn with_client(config: AgentConfig, client: Arc<dyn Client>) -> Self {
        Self {
            config,
            sessions: SessionRegistry::new(),
            client: Some(client),
        }
    }

    fn session_client(&self, session_id: &SessionId) -> Result<SessionClient, Error> {
        let client: Arc<dyn Client> = match &self.client {
            Some(client) => client.clone(),
            None => ACP_CLIENT
                .get()
                .map(|client| client.clone() as Arc<dyn Client>)
                .ok_or_else(|| Error::internal_error().data("ACP client is not connected"))?,
        };
        Ok(SessionClient::new(session_id.clone(), client))
    }

    fn auth_methods() -> Vec<AuthMethod> {
        vec![
            AuthMethod::new("cursor-agent-login", "Cursor Agent (pre-authenticated)").description(
                "Run `cursor-agent login` in a terminal before starting. This adapter shells out \
                 to the CLI in non-interactive mode and cannot complete a login itself.",
            ),
        ]
    }

    fn model_state() -> SessionModelState {
        SessionModelState::new(
            ModelId::new(MODEL_ID),
            vec![ModelInfo::new(ModelId::new(MODEL_ID), "Cursor Agent (auto)")],
        )
    }
}

#[async_trait::async_trait(?Send)]
impl Agent for AcpAgent {
    async fn initialize(&self, request: InitializeRequest) -> Result<InitializeResponse, Error> {
        debug!(
            "Received initialize request with protocol version {:?}",
            request.protocol_version
        );

        let mut agent_capabilities = AgentCapabilities::new()
            .prompt_capabilities(PromptCapabilities::new().embedded_context(true))
            .load_session(false);
        agent_capabilities.session_capabilities =
            SessionCapabilities::new().list(SessionListCapabilities::new());

        Ok(InitializeResponse::new(ProtocolVersion::V1)
            .agent_capabilities(agent_capabilities)
            .agent_info(
                Implementation::new("cursor-agent-acp", env!("CARGO_PKG_VERSION"))
                    .title("Cursor Agent"),
            )
            .auth_methods(Self::auth_methods()))
    }

    async fn authenticate(
        &self,
        _request: AuthenticateRequest,
    ) -> Result<AuthenticateResponse, Error> {
        Err(Error::method_not_found()
            .data("authenticate is not implemented; run `cursor-agent login`"))
    }

    async fn new_session(&self, request: NewSessionRequest) -> Result<NewSessionResponse, Error> {
        let session_id = SessionId::new(Uuid::new_v4().to_string());
        let client = self.session_client(&session_id)?;
        let session = self
            .sessions
            .insert(Session::new(session_id.clone(), request.cwd));
        info!(
            "Created session {} in {}",
            session_id.0,
            session.cwd.display()
        );

        tokio::task::spawn_local(async move {
            client
                .send_update(SessionUpdate::AvailableCommandsUpdate(
                    AvailableCommandsUpdate::new(Vec::new()),
                ))
                .await;
        });

        Ok(NewSessionResponse::new(session_id)
            .modes(session.mode().mode_state())
            .models(Self::model_state()))
    }

    async fn load_session(
        &self,
        _request: LoadSessionRequest,
    ) -> Result<LoadSessionResponse, Error> {
        Err(Error::invalid_params()
            .data("load_session is not supported (sessions are in-memory)"))
    }

    async fn list_sessions(
        &self,
        _request: ListSessionsRequest,
    ) -> Result<ListSessionsResponse, Error> {
        let sessions = self
            .sessions
            .list()
            .iter()
            .map(|s| SessionInfo::new(s.id.clone(), s.cwd.clone()).title("Cursor Agent"))
            .collect::<Vec<_>>();
        Ok(ListSessionsResponse::new(sessions))
    }

    async fn prompt(&self, request: PromptRequest) -> Result<PromptResponse, Error> {
        let session = self.sessions.get(&request.session_id)?;
        let client = self.session_client(&session.id)?;
        let Some(_turn) = session.begin_turn() else {
            return Err(Error::invalid_params().data(format!(
                "a prompt is already running for session {}",
                session.id.0
            )));
        };

        let stop_reason = run_turn(&session, &client, &self.config, &request.prompt).await;
        Ok(PromptResponse::new(stop_reason))
    }

    async fn cancel(&self, args: CancelNotification) -> Result<(), Error> {
        let session = self.sessions.get(&args.session_id)?;
        if session.is_turn_active() {
            info!("Cancelling session {}", session.id.0);
        } else {
            debug!("Cancel for idle session {}", session.id.0);
        }
        session.mark_cancelled();

        if let Some(process) = session.active_process() {
            tokio::task::spawn_local(process.terminate(TERMINATE_GRACE));
        }
        Ok(())
    }

    async fn set_session_mode(
        &self,
        args: SetSessionModeRequest,
    ) -> Result<SetSessionModeResponse, Error> {
        let session = self.sessions.get(&args.session_id)?;
        let mode = AgentMode::parse(args.mode_id.0.as_ref()).ok_or_else(|| {
            Error::invalid_params().data(format!("invalid mode: {}", args.mode_id.0))
        })?;
        let client = self.session_client(&session.id)?;

        session.set_mode(mode);
        debug!("Session {} switched to {} mode", session.id.0, mode.id());
        client
            .send_update(SessionUpdate::CurrentModeUpdate(CurrentModeUpdate::new(
                mode.mode_id(),
            )))
            .await;
        Ok(SetSessionModeResponse::new())
    }

    async fn set_session_model(
        &self,
        args: SetSessionModelRequest,
    ) -> Result<SetSessionModelResponse, Error> {
        let session = self.sessions.get(&args.session_id)?;
        debug!(
            "Ignoring model {} for session {}; cursor-agent picks its own",
            args.model_id.0, session.id.0
        );
        Ok(SetSessionModelResponse::new())
    }

    async fn set_session_config_option(
        &self,
        _args: SetSessionConfigOptionRequest,
    ) -> Result<SetSessionConfigOptionResponse, Error> {
        Err(Error::method_not_found().data("session config options are not supported"))
    }
}
