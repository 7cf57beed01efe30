use anyhow::Result;
use clap::Parser;
use client_lib::ClientSession;
use server::command::{DEFAULT_HOST, DEFAULT_PORT, parse_port};
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

use crate::console::ClientConsole;

mod console;

#[derive(Parser, Debug)]
#[command(version, about = "Console client for the chat server")]
struct Cli {
    /// Identifier announced to the server on login.
    login_id: Option<String>,

    /// Server host name.
    host: Option<String>,

    /// Server port. Missing or invalid values use 5555.
    port: Option<String>,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let Some(login_id) = cli.login_id else {
        println!("No login ID specified");
        std::process::exit(1);
    };

    let host = cli.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = match cli.port.as_deref().map(parse_port) {
        Some(Ok(port)) => port,
        Some(Err(_)) => {
            println!("Invalid input. Using default port");
            DEFAULT_PORT
        }
        None => DEFAULT_PORT,
    };

    let (session, events) = ClientSession::new(login_id, host, port);
    let mut console = ClientConsole::new(session, std::io::stdout());
    console.login().await;
    console.run(BufReader::new(tokio::io::stdin()), events).await;

    Ok(())
}
