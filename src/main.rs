mod catalog;
mod compiler;
mod config;
mod console;
mod error;
mod invocation;
mod procedure;
mod sandbox;
mod schema;
mod store;

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::console::Console;
use crate::invocation::InvocationService;
use crate::sandbox::SandboxExecutor;
use crate::store::ProcedureStore;

fn print_help() {
    println!(
        "\
rpc-lab v{}

A registry of simulated RPC procedures with a sandboxed snippet runner.
Reads one command per line on stdin and answers with one line of JSON.

USAGE:
    rpc-lab [OPTIONS] [CONFIG_PATH]

ARGUMENTS:
    CONFIG_PATH    Path to TOML configuration file [default: config/rpc-lab.toml]
                   Built-in defaults are used when the default file is absent.

OPTIONS:
    -h, --help       Print this help message and exit
    -V, --version    Print version and exit

COMMANDS:
    frameworks | protocols [<framework>] | methods | health | status | help
    list | get <id> | create <json> | update <id> <json> | delete <id>
    invoke <id> [<json-object> | key=value ...]

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG    Log level filter for tracing, written to stderr
                (e.g. debug, rpc_lab=debug,warn)

EXAMPLES:
    rpc-lab                                # uses config/rpc-lab.toml
    rpc-lab /etc/rpc-lab/lab.toml          # custom config path
    echo 'frameworks' | rpc-lab            # one-shot query",
        env!("CARGO_PKG_VERSION"),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --help / --version before anything else
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("rpc-lab v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {}
        }
    }

    // Initialize logging (RUST_LOG=debug for debug mode); stdout carries replies
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rpc_lab=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading configuration from {path}");
            Config::load(&path)?
        }
        None => {
            let path = "config/rpc-lab.toml";
            info!("Loading configuration from {path} (defaults if absent)");
            Config::load_or_default(path)?
        }
    };

    info!(
        "Sandbox: {} steps, call depth {}",
        config.sandbox.max_steps, config.sandbox.max_call_depth
    );
    match config.invoke.timeout() {
        Some(limit) => info!("Invocation deadline: {} ms", limit.as_millis()),
        None => info!("Invocation deadline: none"),
    }
    info!(
        "Frameworks: {}",
        config
            .catalog
            .frameworks
            .iter()
            .map(|f| f.id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let store = Arc::new(ProcedureStore::new());
    let service = Arc::new(InvocationService::new(
        store,
        SandboxExecutor::new(config.sandbox.clone()),
    ));
    let console = Console::new(service, Catalog::new(config.catalog.clone()), config.invoke.clone());

    info!("rpc-lab v{} ready, reading commands from stdin", env!("CARGO_PKG_VERSION"));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    // one signal future, also watched while a command is running
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("Input closed, exiting");
                        return Ok(());
                    }
                    Err(e) => {
                        error!("Failed to read input: {e}");
                        return Err(e.into());
                    }
                };
                let reply = tokio::select! {
                    reply = console.handle_line(&line) => reply,
                    _ = &mut shutdown => {
                        info!("Shutdown signal received, exiting");
                        return Ok(());
                    }
                };
                if let Some(reply) = reply {
                    stdout.write_all(reply.as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                    stdout.flush().await?;
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received, exiting");
                return Ok(());
            }
        }
    }
}
