//! One prompt turn: run `cursor-agent`, stream its events to the client and
//! settle on a stop reason.

use std::sync::LazyLock;

use agent_client_protocol::{ContentBlock, StopReason};
use regex_lite::Regex;
use tokio::{
    io::AsyncReadExt as _,
    time::{Instant, sleep_until},
};
use tracing::{debug, error, info, warn};
use unicode_segmentation::UnicodeSegmentation as _;

use crate::{
    config::{AgentConfig, DRAIN_GRACE, EXECUTABLE_ENV},
    cursor_process::{CursorProcess, CursorProcessParts},
    event_mapper::map_event,
    line_buffer::LineBuffer,
    prompt::build_turn_prompt,
    session::Session,
    session_client::SessionClient,
    stream_json::{ResultSubtype, StreamEvent, parse_line},
};

const AUTH_HINT: &str = "cursor-agent is not logged in. Run `cursor-agent login` in a terminal, \
then send your message again.";

static AUTH_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(login.*cursor|cursor.*login)").unwrap_or_else(|_| std::process::abort())
});

const LOG_PREVIEW_GRAPHEMES: usize = 80;

/// Run a turn to completion. The caller holds the session's turn guard.
pub async fn run_turn(
    session: &Session,
    client: &SessionClient,
    config: &AgentConfig,
    prompt: &[ContentBlock],
) -> StopReason {
    TurnRunner::new(session, client).run(config, prompt).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnPhase {
    Idle,
    Running,
    Draining,
    Resolved,
}

/// Joins the two signals that end a turn: the child was reaped and its
/// output streams reached EOF. Once the child is gone the streams get
/// [`DRAIN_GRACE`] to close, since grandchildren may keep the pipes open.
#[derive(Debug, Default)]
struct DrainState {
    exit_success: Option<bool>,
    stdout_closed: bool,
    stderr_closed: bool,
    deadline: Option<Instant>,
}

impl DrainState {
    fn process_exited(&mut self, success: bool) {
        self.exit_success = Some(success);
        self.deadline = Some(Instant::now() + DRAIN_GRACE);
    }

    fn has_exited(&self) -> bool {
        self.exit_success.is_some()
    }

    fn is_complete(&self) -> bool {
        self.has_exited() && self.stdout_closed && self.stderr_closed
    }

    fn deadline(&self) -> Instant {
        self.deadline.unwrap_or_else(Instant::now)
    }
}

struct TurnRunner<'a> {
    session: &'a Session,
    client: &'a SessionClient,
    phase: TurnPhase,
    last_assistant_text: String,
    result_stop_reason: Option<StopReason>,
    auth_hint_sent: bool,
}

impl<'a> TurnRunner<'a> {
    fn new(session: &'a Session, client: &'a SessionClient) -> Self {
        Self {
            session,
            client,
            phase: TurnPhase::Idle,
            last_assistant_text: String::new(),
            result_stop_reason: None,
            auth_hint_sent: false,
        }
    }

    fn enter(&mut self, phase: TurnPhase) {
        debug!(
            "Turn for session {}: {:?} -> {phase:?}",
            self.session.id.0, self.phase
        );
        self.phase = phase;
    }

    async fn run(mut self, config: &AgentConfig, prompt: &[ContentBlock]) -> StopReason {
        let prompt_text = build_turn_prompt(self.session.mode(), prompt);
        let resume_token = self.session.resume_token();
        info!(
            "Starting cursor-agent turn (session={}, mode={}, resume={:?}): {}",
            self.session.id.0,
            self.session.mode().id(),
            resume_token,
            preview(&prompt_text)
        );

        let process = match CursorProcess::spawn(
            config,
            &self.session.cwd,
            resume_token.as_deref(),
            &prompt_text,
        ) {
            Ok(process) => process,
            Err(err) => {
                error!("Failed to start cursor-agent: {err:#}");
                self.client
                    .send_agent_text(format!(
                        "Failed to start cursor-agent: {err:#}\n\nMake sure it is installed and on \
                         PATH, or point {EXECUTABLE_ENV} at it."
                    ))
                    .await;
                self.enter(TurnPhase::Resolved);
                return resolve_stop_reason(self.session.is_cancelled(), None, false);
            }
        };
        self.session.set_active_process(process.handle());
        self.enter(TurnPhase::Running);

        let exit_success = self.pump(process.into_parts()).await;

        let stop_reason = resolve_stop_reason(
            self.session.is_cancelled(),
            self.result_stop_reason,
            exit_success,
        );
        self.enter(TurnPhase::Resolved);
        info!(
            "cursor-agent turn finished (session={}): {stop_reason:?}",
            self.session.id.0
        );
        stop_reason
    }

    /// Drive the child until it has exited and its output is drained.
    /// Returns whether it exited successfully.
    async fn pump(&mut self, parts: CursorProcessParts) -> bool {
        let CursorProcessParts {
            mut child,
            mut stdout,
            mut stderr,
            mut kill_rx,
            exited_tx,
        } = parts;

        let mut stdout_lines = LineBuffer::new();
        let mut stderr_lines = LineBuffer::new();
        let mut stdout_buf = [0u8; 8192];
        let mut stderr_buf = [0u8; 4096];
        let mut drain = DrainState::default();

        loop {
            if drain.is_complete() {
                break;
            }
            tokio::select! {
                read = stdout.read(&mut stdout_buf), if !drain.stdout_closed => match read {
                    Ok(0) => {
                        if let Some(line) = stdout_lines.finish() {
                            self.handle_line(&line).await;
                        }
                        drain.stdout_closed = true;
                    }
                    Ok(n) => {
                        for line in stdout_lines.push(&stdout_buf[..n]) {
                            self.handle_line(&line).await;
                        }
                    }
                    Err(err) => {
                        warn!("Failed to read cursor-agent stdout: {err}");
                        drain.stdout_closed = true;
                    }
                },
                read = stderr.read(&mut stderr_buf), if !drain.stderr_closed => match read {
                    Ok(0) => {
                        if let Some(line) = stderr_lines.finish() {
                            self.handle_stderr_line(&line).await;
                        }
                        drain.stderr_closed = true;
                    }
                    Ok(n) => {
                        for line in stderr_lines.push(&stderr_buf[..n]) {
                            self.handle_stderr_line(&line).await;
                        }
                    }
                    Err(err) => {
                        debug!("Failed to read cursor-agent stderr: {err}");
                        drain.stderr_closed = true;
                    }
                },
                status = child.wait(), if !drain.has_exited() => {
                    let success = match status {
                        Ok(status) => {
                            debug!("cursor-agent exited with {status}");
                            status.success()
                        }
                        Err(err) => {
                            error!("Failed to wait for cursor-agent: {err}");
                            false
                        }
                    };
                    exited_tx.send_replace(true);
                    drain.process_exited(success);
                    self.enter(TurnPhase::Draining);
                },
                Some(()) = kill_rx.recv(), if !drain.has_exited() => {
                    if let Err(err) = child.start_kill() {
                        debug!("Failed to kill cursor-agent: {err}");
                    }
                },
                () = sleep_until(drain.deadline()), if drain.has_exited() => {
                    warn!(
                        "cursor-agent output still open {DRAIN_GRACE:?} after exit; finishing turn"
                    );
                    break;
                },
            }
        }

        drain.exit_success.unwrap_or(false)
    }

    async fn handle_line(&mut self, line: &str) {
        let Some(parsed) = parse_line(line) else {
            return;
        };
        if let Some(token) = parsed.session_id.as_deref().filter(|t| !t.is_empty()) {
            self.session.capture_resume_token(token);
        }
        let Some(event) = parsed.event else {
            return;
        };

        match &event {
            StreamEvent::Result(result) => {
                debug!(
                    "cursor-agent result: {:?} (is_error={}, duration_ms={:?})",
                    result.subtype, result.is_error, result.duration_ms
                );
                if let Some(stop_reason) = result_stop_reason(result.subtype) {
                    self.result_stop_reason = Some(stop_reason);
                }
            }
            StreamEvent::System(system) => {
                debug!(
                    "cursor-agent system event: subtype={:?} model={:?} cwd={:?}",
                    system.subtype, system.model, system.cwd
                );
            }
            _ => {}
        }

        for notification in map_event(&self.session.id, &event, &self.last_assistant_text) {
            self.client.send_notification(notification).await;
        }

        if let StreamEvent::Assistant(message) = &event {
            let text = message.text();
            if !text.is_empty() {
                self.last_assistant_text = text;
            }
        }
    }

    /// Stderr is diagnostics only. A login failure produces one hint per
    /// turn, however many lines match.
    async fn handle_stderr_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        debug!("cursor-agent stderr: {line}");
        if !self.auth_hint_sent && is_auth_failure(line) {
            self.auth_hint_sent = true;
            warn!("cursor-agent needs authentication: {line}");
            self.client.send_agent_text(AUTH_HINT).await;
        }
    }
}

fn is_auth_failure(line: &str) -> bool {
    AUTH_FAILURE.is_match(line)
}

fn result_stop_reason(subtype: ResultSubtype) -> Option<StopReason> {
    match subtype {
        ResultSubtype::Success => Some(StopReason::EndTurn),
        ResultSubtype::Cancelled => Some(StopReason::Cancelled),
        ResultSubtype::Error | ResultSubtype::Failure | ResultSubtype::Refused => {
            Some(StopReason::Refusal)
        }
        ResultSubtype::Other => None,
    }
}

/// Cancellation wins, then the CLI's own verdict, then the exit status.
fn resolve_stop_reason(
    cancelled: bool,
    from_result: Option<StopReason>,
    exit_success: bool,
) -> StopReason {
    if cancelled {
        return StopReason::Cancelled;
    }
    if let Some(stop_reason) = from_result {
        return stop_reason;
    }
    if exit_success {
        StopReason::EndTurn
    } else {
        StopReason::Refusal
    }
}

fn preview(text: &str) -> String {
    let mut graphemes = text.graphemes(true);
    let head: String = graphemes
        .by_ref()
        .take(LOG_PREVIEW_GRAPHEMES)
        .collect::<String>()
        .replace('\n', " ");
    if graphemes.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_stop_reason() {
        assert_eq!(
            resolve_stop_reason(true, Some(StopReason::EndTurn), true),
            StopReason::Cancelled
        );
        assert_eq!(
            resolve_stop_reason(false, Some(StopReason::Refusal), true),
            StopReason::Refusal
        );
        assert_eq!(resolve_stop_reason(false, None, true), StopReason::EndTurn);
        assert_eq!(resolve_stop_reason(false, None, false), StopReason::Refusal);
    }

    #[test]
    fn test_result_subtypes() {
        assert_eq!(
            result_stop_reason(ResultSubtype::Success),
            Some(StopReason::EndTurn)
        );
        assert_eq!(
            result_stop_reason(ResultSubtype::Cancelled),
            Some(StopReason::Cancelled)
        );
        for subtype in [
            ResultSubtype::Error,
            ResultSubtype::Failure,
            ResultSubtype::Refused,
        ] {
            assert_eq!(result_stop_reason(subtype), Some(StopReason::Refusal));
        }
        assert_eq!(result_stop_reason(ResultSubtype::Other), None);
    }

    #[test]
    fn test_auth_failure_detection() {
        assert!(is_auth_failure(
            "Error: not authenticated. Please run `cursor-agent login`"
        ));
        assert!(is_auth_failure("LOGIN required for Cursor"));
        assert!(!is_auth_failure("login shell detected"));
        assert!(!is_auth_failure("cursor-agent v2025.09"));
    }

    #[test]
    fn test_preview_truncates_by_grapheme() {
        assert_eq!(preview("short\nprompt"), "short prompt");
        let long = "é".repeat(LOG_PREVIEW_GRAPHEMES + 5);
        let shortened = preview(&long);
        assert!(shortened.ends_with('…'));
        assert_eq!(shortened.graphemes(true).count(), LOG_PREVIEW_GRAPHEMES + 1);
    }

    #[cfg(unix)]
    mod process {
        use std::{path::PathBuf, sync::Arc};

        use agent_client_protocol::{SessionId, SessionUpdate, ToolCallStatus};
        use tempfile::TempDir;

        use super::super::*;
        use crate::test_support::{StubClient, fake_cursor_agent};

        struct Fixture {
            _dir: TempDir,
            dir: PathBuf,
            session: Session,
            stub: Arc<StubClient>,
            client: SessionClient,
        }

        fn fixture() -> Fixture {
            let dir = TempDir::new().unwrap();
            let path = dir.path().to_path_buf();
            let session_id = SessionId::new("turn-test");
            let stub = Arc::new(StubClient::new());
            let client = SessionClient::new(session_id.clone(), stub.clone());
            Fixture {
                session: Session::new(session_id, path.clone()),
                dir: path,
                _dir: dir,
                stub,
                client,
            }
        }

        async fn run(fixture: &Fixture, config: &AgentConfig, text: &str) -> StopReason {
            let _turn = fixture.session.begin_turn().unwrap();
            run_turn(
                &fixture.session,
                &fixture.client,
                config,
                &[ContentBlock::from(text)],
            )
            .await
        }

        #[tokio::test]
        async fn test_successful_turn_streams_events() -> anyhow::Result<()> {
            let fixture = fixture();
            let config = fake_cursor_agent(
                &fixture.dir,
                r#"cat <<'EOF'
{"type":"system","subtype":"init","session_id":"chat-1","model":"auto"}
{"type":"user","message":{"role":"user","content":[{"type":"text","text":"hi"}]},"session_id":"chat-1"}
{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"Hel"}]},"session_id":"chat-1"}
{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"Hello"}]},"session_id":"chat-1"}
{"type":"tool_call","subtype":"started","call_id":"c1","tool_call":{"readToolCall":{"args":{"path":"a.txt"}}},"session_id":"chat-1"}
{"type":"tool_call","subtype":"completed","call_id":"c1","tool_call":{"readToolCall":{"args":{"path":"a.txt"},"result":{"success":{"content":"A"}}}},"session_id":"chat-1"}
not json at all
{"type":"result","subtype":"success","is_error":false,"session_id":"chat-2"}
EOF"#,
            );

            let stop_reason = run(&fixture, &config, "hi").await;

            assert_eq!(stop_reason, StopReason::EndTurn);
            assert_eq!(fixture.stub.agent_texts(), vec!["Hel", "lo"]);
            let statuses: Vec<_> = fixture
                .stub
                .updates()
                .into_iter()
                .filter_map(|update| match update {
                    SessionUpdate::ToolCall(call) => Some(call.status),
                    SessionUpdate::ToolCallUpdate(update) => update.fields.status,
                    _ => None,
                })
                .collect();
            assert_eq!(
                statuses,
                vec![
                    ToolCallStatus::Pending,
                    ToolCallStatus::InProgress,
                    ToolCallStatus::Completed
                ]
            );
            assert_eq!(fixture.session.resume_token().as_deref(), Some("chat-1"));
            Ok(())
        }

        #[tokio::test]
        async fn test_exit_code_decides_without_result() -> anyhow::Result<()> {
            let fixture = fixture();
            let ok = fake_cursor_agent(&fixture.dir, "exit 0");
            assert_eq!(run(&fixture, &ok, "hi").await, StopReason::EndTurn);

            let failing = fake_cursor_agent(&fixture.dir, "exit 3");
            assert_eq!(run(&fixture, &failing, "hi").await, StopReason::Refusal);
            Ok(())
        }

        #[tokio::test]
        async fn test_result_error_overrides_exit_code() -> anyhow::Result<()> {
            let fixture = fixture();
            let config = fake_cursor_agent(
                &fixture.dir,
                r#"echo '{"type":"result","subtype":"error","is_error":true}'"#,
            );
            assert_eq!(run(&fixture, &config, "hi").await, StopReason::Refusal);
            Ok(())
        }

        #[tokio::test]
        async fn test_trailing_line_without_newline_is_read() -> anyhow::Result<()> {
            let fixture = fixture();
            let config = fake_cursor_agent(
                &fixture.dir,
                r#"printf '%s' '{"type":"result","subtype":"cancelled"}'"#,
            );
            assert_eq!(run(&fixture, &config, "hi").await, StopReason::Cancelled);
            Ok(())
        }

        #[tokio::test]
        async fn test_turn_resolves_while_grandchild_holds_output() -> anyhow::Result<()> {
            let fixture = fixture();
            let config = fake_cursor_agent(
                &fixture.dir,
                r#"sleep 5 &
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"hi"}]}}'
echo '{"type":"result","subtype":"success"}'
exit 0"#,
            );

            let started = std::time::Instant::now();
            assert_eq!(run(&fixture, &config, "hi").await, StopReason::EndTurn);
            assert!(
                started.elapsed() < std::time::Duration::from_secs(3),
                "turn took {:?}",
                started.elapsed()
            );
            assert_eq!(fixture.stub.agent_texts(), vec!["hi"]);
            Ok(())
        }

        #[tokio::test]
        async fn test_auth_failure_adds_hint() -> anyhow::Result<()> {
            let fixture = fixture();
            let config = fake_cursor_agent(
                &fixture.dir,
                "echo 'Error: please run cursor-agent login first' >&2\n\
                 echo 'Cursor login required' >&2\n\
                 exit 1",
            );

            assert_eq!(run(&fixture, &config, "hi").await, StopReason::Refusal);
            assert_eq!(fixture.stub.agent_texts(), vec![AUTH_HINT]);
            Ok(())
        }

        #[tokio::test]
        async fn test_resume_token_and_prompt_are_passed() -> anyhow::Result<()> {
            let fixture = fixture();
            let args_file = fixture.dir.join("args.txt");
            let config = fake_cursor_agent(
                &fixture.dir,
                &format!("printf '%s\\n' \"$@\" > '{}'", args_file.display()),
            );
            fixture.session.capture_resume_token("chat-9");

            assert_eq!(run(&fixture, &config, "fix the bug").await, StopReason::EndTurn);

            let args = std::fs::read_to_string(&args_file)?;
            let args: Vec<_> = args.lines().collect();
            assert_eq!(
                args,
                vec![
                    "--print",
                    "--output-format",
                    "stream-json",
                    "--stream-partial-output",
                    "--resume",
                    "chat-9",
                    "fix the bug"
                ]
            );
            Ok(())
        }

        #[tokio::test]
        async fn test_spawn_failure_is_a_refusal() -> anyhow::Result<()> {
            let fixture = fixture();
            let config = AgentConfig {
                executable: fixture
                    .dir
                    .join("missing-cursor-agent")
                    .to_string_lossy()
                    .into_owned(),
                extra_args: Vec::new(),
            };

            assert_eq!(run(&fixture, &config, "hi").await, StopReason::Refusal);
            let texts = fixture.stub.agent_texts();
            assert_eq!(texts.len(), 1);
            assert!(texts[0].starts_with("Failed to start cursor-agent"));
            Ok(())
        }
    }
}
