//! Cursor Agent ACP - bridges the `cursor-agent` CLI to the Agent Client Protocol.
#![deny(clippy::print_stdout, clippy::print_stderr)]

use agent_client_protocol::AgentSideConnection;
use std::sync::{Arc, OnceLock};
use std::{io::Result as IoResult, rc::Rc};
use tokio::task::LocalSet;
use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};
use tracing_subscriber::EnvFilter;

mod acp_agent;
pub mod config;
mod cursor_process;
pub mod event_mapper;
mod line_buffer;
mod prompt;
mod session;
mod session_client;
pub mod stream_json;
#[cfg(test)]
mod test_support;
pub mod tool_calls;
mod turn;

pub use config::AgentConfig;

pub static ACP_CLIENT: OnceLock<Arc<AgentSideConnection>> = OnceLock::new();

/// Run the cursor-agent ACP bridge over stdio.
///
/// # Errors
///
/// If the ACP connection fails.
pub async fn run_main(config: AgentConfig) -> IoResult<()> {
    // stdout carries ACP frames, so logs go to stderr. `RUST_LOG` sets the level.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(
        "Starting cursor-agent-acp {} (executable={}, extra_args={:?})",
        env!("CARGO_PKG_VERSION"),
        config.executable,
        config.extra_args
    );

    let agent = Rc::new(acp_agent::AcpAgent::new(config));

    let stdin = tokio::io::stdin().compat();
    let stdout = tokio::io::stdout().compat_write();

    LocalSet::new()
        .run_until(async move {
            let (client, io_task) = AgentSideConnection::new(agent.clone(), stdout, stdin, |fut| {
                tokio::task::spawn_local(fut);
            });

            if ACP_CLIENT.set(Arc::new(client)).is_err() {
                return Err(std::io::Error::other("ACP client already set"));
            }

            io_task
                .await
                .map_err(|e| std::io::Error::other(format!("ACP I/O error: {e}")))
        })
        .await?;

    Ok(())
}
