//! A scripted tool provider speaking MCP on stdin/stdout, one JSON-RPC
//! message per line. Stands in for the GitHub server in tests and demos.

use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

mod tools;

use tools::{handle, Reply, Request};

const DEFAULT_INSTRUCTIONS: &str = "Use get_issues and get_commits to answer questions about a repository.";

#[tokio::main]
async fn main() -> io::Result<()> {
    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let instructions =
        std::env::var("STUB_INSTRUCTIONS").unwrap_or_else(|_| DEFAULT_INSTRUCTIONS.to_string());

    let mut lines = BufReader::new(io::stdin()).lines();
    let mut stdout = io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable message");
                continue;
            }
        };

        match handle(&request, &instructions) {
            Reply::Respond(response) => {
                let mut out = response.to_string();
                out.push('\n');
                stdout.write_all(out.as_bytes()).await?;
                stdout.flush().await?;
            }
            Reply::Silent => {}
            Reply::Exit => {
                tracing::info!("exit requested");
                break;
            }
        }
    }
    Ok(())
}
