//! Per-session state and the in-memory registry.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    path::PathBuf,
    rc::Rc,
};

use agent_client_protocol::{Error, SessionId, SessionMode, SessionModeId, SessionModeState};
use tracing::{debug, warn};

use crate::cursor_process::ProcessHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentMode {
    #[default]
    Default,
    Plan,
}

impl AgentMode {
    const ALL: [AgentMode; 2] = [AgentMode::Default, AgentMode::Plan];

    pub fn parse(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.id() == id)
    }

    pub fn id(self) -> &'static str {
        match self {
            AgentMode::Default => "default",
            AgentMode::Plan => "plan",
        }
    }

    pub fn mode_id(self) -> SessionModeId {
        SessionModeId::new(self.id())
    }

    fn name(self) -> &'static str {
        match self {
            AgentMode::Default => "Default",
            AgentMode::Plan => "Plan",
        }
    }

    fn description(self) -> &'static str {
        match self {
            AgentMode::Default => "Let cursor-agent read, edit and run commands as it sees fit",
            AgentMode::Plan => "Ask cursor-agent for a plan before it changes anything",
        }
    }

    /// Mode declaration advertised to the client, with `self` as current.
    pub fn mode_state(self) -> SessionModeState {
        SessionModeState::new(
            self.mode_id(),
            Self::ALL
                .into_iter()
                .map(|mode| {
                    SessionMode::new(mode.mode_id(), mode.name()).description(mode.description())
                })
                .collect(),
        )
    }
}

pub struct Session {
    pub id: SessionId,
    pub cwd: PathBuf,
    mode: Cell<AgentMode>,
    resume_token: RefCell<Option<String>>,
    cancelled: Cell<bool>,
    turn_active: Cell<bool>,
    active_process: RefCell<Option<ProcessHandle>>,
}

impl Session {
    pub fn new(id: SessionId, cwd: PathBuf) -> Self {
        Self {
            id,
            cwd,
            mode: Cell::new(AgentMode::Default),
            resume_token: RefCell::new(None),
            cancelled: Cell::new(false),
            turn_active: Cell::new(false),
            active_process: RefCell::new(None),
        }
    }

    pub fn mode(&self) -> AgentMode {
        self.mode.get()
    }

    pub fn set_mode(&self, mode: AgentMode) {
        self.mode.set(mode);
    }

    pub fn resume_token(&self) -> Option<String> {
        self.resume_token.borrow().clone()
    }

    /// Remember the CLI's chat id. The first value is kept for the lifetime
    /// of the session.
    pub fn capture_resume_token(&self, token: &str) {
        let mut current = self.resume_token.borrow_mut();
        match current.as_deref() {
            None => {
                debug!("Session {} resumes cursor-agent chat {token}", self.id.0);
                *current = Some(token.to_string());
            }
            Some(existing) if existing != token => {
                warn!(
                    "cursor-agent reported chat {token} for session {}; keeping {existing}",
                    self.id.0
                );
            }
            Some(_) => {}
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }

    pub fn mark_cancelled(&self) {
        self.cancelled.set(true);
    }

    /// Start a turn. Returns `None` while another turn is still running.
    pub fn begin_turn(&self) -> Option<TurnGuard<'_>> {
        if self.turn_active.replace(true) {
            return None;
        }
        self.cancelled.set(false);
        Some(TurnGuard { session: self })
    }

    pub fn is_turn_active(&self) -> bool {
        self.turn_active.get()
    }

    pub fn set_active_process(&self, handle: ProcessHandle) {
        *self.active_process.borrow_mut() = Some(handle);
    }

    pub fn active_process(&self) -> Option<ProcessHandle> {
        self.active_process.borrow().clone()
    }
}

/// Marks the session idle again when the turn ends, however it ends.
pub struct TurnGuard<'a> {
    session: &'a Session,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.session.active_process.borrow_mut().take();
        self.session.turn_active.set(false);
    }
}

/// Sessions live until the agent process exits; nothing is evicted.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RefCell<HashMap<SessionId, Rc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Session) -> Rc<Session> {
        let session = Rc::new(session);
        self.sessions
            .borrow_mut()
            .insert(session.id.clone(), session.clone());
        session
    }

    pub fn get(&self, session_id: &SessionId) -> Result<Rc<Session>, Error> {
        self.sessions
            .borrow()
            .get(session_id)
            .cloned()
            .ok_or_else(|| {
                Error::resource_not_found(None).data(format!("session not found: {}", session_id.0))
            })
    }

    pub fn list(&self) -> Vec<Rc<Session>> {
        let mut sessions: Vec<_> = self.sessions.borrow().values().cloned().collect();
        sessions.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        sessions
    }
}
