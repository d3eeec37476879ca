//! Line Chat Server - Entry Point
//!
//! `line_chat_server [bind_addr]` runs the server until Ctrl-C.
//! `line_chat_server client <addr> <name>` runs a stdin/stdout client.

use std::env;

use chrono::Local;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use line_chat_server::message::{NAME_CHANGED_PREFIX, SERVER_STOPPED};
use line_chat_server::{ChatClient, Server, ServerConfig, ServerEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=line_chat_server=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("line_chat_server=info")),
        )
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("client") {
        let addr = args
            .get(1)
            .cloned()
            .unwrap_or_else(|| line_chat_server::config::DEFAULT_ADDR.to_string());
        let name = args.get(2).cloned().unwrap_or_default();
        return run_client(&addr, &name).await;
    }

    run_server(args.first().cloned()).await
}

async fn run_server(bind_override: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = match env::var("CHAT_CONFIG") {
        Ok(path) => ServerConfig::from_file(path)?,
        Err(_) => ServerConfig::default(),
    }
    .apply_env();
    let config = match bind_override {
        Some(addr) => config.with_bind_addr(addr),
        None => config,
    };

    let bind_addr = config.bind_addr.clone();
    let server = Server::new(config);

    // Console sink, in the server window's "[HH:MM:SS] line" format
    let mut events = server.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ServerEvent::Log { line }) => {
                    println!("[{}] {}", Local::now().format("%H:%M:%S"), line);
                }
                Ok(ServerEvent::MembershipChanged { names }) => {
                    info!(online = names.len(), users = ?names, "user list");
                }
                Ok(ServerEvent::StateChanged { .. }) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event sink lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    server.start(&bind_addr).await?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }

    info!("Shutting down");
    server.stop().await;
    Ok(())
}

async fn run_client(addr: &str, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = ChatClient::connect(addr, name).await?;
    info!("Connected to {} as '{}'", addr, client.name());

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = stdin.next_line() => match line? {
                Some(text) => client.send_chat(&text).await?,
                None => {
                    client.exit().await?;
                    break;
                }
            },
            incoming = client.recv_line() => match incoming? {
                Some(line) if line == SERVER_STOPPED => {
                    println!("*** server stopped");
                    break;
                }
                Some(line) => match line.strip_prefix(NAME_CHANGED_PREFIX) {
                    Some(name) => println!("*** you are now known as {name}"),
                    None => println!("{line}"),
                },
                None => {
                    println!("*** disconnected");
                    break;
                }
            },
        }
    }

    Ok(())
}
