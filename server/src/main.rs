use anyhow::Result;
use clap::Parser;
use server::command::{DEFAULT_PORT, parse_port};
use server::console::{ConsoleExit, ServerConsole};
use server::ChatServer;
use tokio::io::BufReader;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Multi-client chat server")]
struct Cli {
    /// Port to listen on. Missing or invalid values use 5555.
    port: Option<String>,

    /// Address to bind the listener to.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

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

    let port = match cli.port.as_deref().map(parse_port) {
        Some(Ok(port)) => port,
        Some(Err(_)) => {
            println!("Invalid input. Using default port");
            DEFAULT_PORT
        }
        None => DEFAULT_PORT,
    };

    let mut chat = ChatServer::new(cli.host, port);
    match chat.start().await {
        Ok(addr) => println!("Server listening for connections on port {}", addr.port()),
        Err(e) => {
            error!("Could not listen on port {}: {}", port, e);
            println!("ERROR - Could not listen for clients!");
        }
    }

    let console = ServerConsole::new(chat, std::io::stdout());
    match console.run(BufReader::new(tokio::io::stdin())).await {
        ConsoleExit::Quit => {}
        ConsoleExit::InputClosed(mut chat) => {
            info!("Console closed; serving until interrupted");
            tokio::signal::ctrl_c().await?;
            chat.close().await;
        }
    }

    Ok(())
}
