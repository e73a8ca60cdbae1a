use anyhow::Result;
use clap::Parser;
use cursor_agent_acp::AgentConfig;

/// ACP agent backed by the `cursor-agent` CLI. Speaks ACP over stdio.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// cursor-agent executable to run; overrides the environment.
    #[arg(long, value_name = "PATH")]
    executable: Option<String>,
}

fn strip_acp_token(args: &mut Vec<std::ffi::OsString>) {
    if args.len() > 1 {
        let arg1 = args[1].to_string_lossy();
        if arg1 == "acp" || arg1 == "--acp" {
            args.remove(1);
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Some ACP clients launch agents as `<command> acp` or with `--acp`.
    // This binary always speaks ACP over stdio, so those tokens are no-ops.
    let mut args: Vec<std::ffi::OsString> = std::env::args_os().collect();
    strip_acp_token(&mut args);

    let cli = Cli::parse_from(args);
    let config = AgentConfig::from_env().with_executable(cli.executable);
    cursor_agent_acp::run_main(config).await?;
    Ok(())
}
