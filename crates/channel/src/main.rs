//! LIME client
//!
//! Connects to a LIME server over TCP, establishes a session and exchanges
//! text messages from the terminal.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use channel::config::Config;
use channel::{ClientChannel, SessionEstablishment, TcpTransport};
use clap::Parser;
use protocol::{Authentication, Message, Node, Notification, Session, SessionState};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Timeout for the session handshake.
const ESTABLISH_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the server to confirm a finishing session.
const FINISH_TIMEOUT: Duration = Duration::from_secs(5);

/// LIME client - exchange messages with a LIME server.
#[derive(Parser, Debug)]
#[command(name = "lime-client")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Server address (host:port)
    #[arg(long)]
    pub server: Option<String>,

    /// Identity to authenticate as (name@domain)
    #[arg(long)]
    pub identity: Option<String>,

    /// Instance name of this client
    #[arg(long)]
    pub instance: Option<String>,

    /// Password for plain authentication (guest when omitted)
    #[arg(long)]
    pub password: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    config.apply_env_overrides();
    apply_cli_overrides(&mut config, &cli);

    // Initialize tracing
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.client.log_level.to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config.validate()?;
    let identity = config.identity()?;

    tracing::info!("Connecting to {}", config.client.server_address);
    let transport = TcpTransport::connect(config.client.server_address.as_str())
        .await
        .with_context(|| format!("Failed to connect to {}", config.client.server_address))?;
    let client = ClientChannel::new(Arc::new(transport), config.channel.clone())?;

    client.add_message_listener(Arc::new(print_message), false);
    client.add_notification_listener(Arc::new(print_notification), false);

    let (session_tx, mut session_rx) = mpsc::unbounded_channel::<Session>();
    client.add_session_listener(
        Arc::new(move |session: &Session| {
            let _ = session_tx.send(session.clone());
        }),
        false,
    );

    let authentication = match &config.client.password {
        Some(password) => Authentication::plain(password),
        None => Authentication::guest(),
    };
    let mut establishment = SessionEstablishment::new(identity, authentication)
        .with_instance(config.client.instance.clone());
    establishment.compression = config.client.compression;
    establishment.encryption = config.client.encryption;

    let session = tokio::time::timeout(ESTABLISH_TIMEOUT, client.establish_session_async(establishment))
        .await
        .context("Timed out establishing the session")??;
    if session.state != SessionState::Established {
        anyhow::bail!(
            "Session ended in the '{}' state: {}",
            session.state,
            session
                .reason
                .and_then(|r| r.description)
                .unwrap_or_else(|| "no reason given".to_string())
        );
    }

    println!(
        "Session established as {}. Type '<to> <text>' to send, Ctrl-C to quit.",
        client
            .local_node()
            .map(|n| n.to_string())
            .unwrap_or_default()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Finishing session...");
                client.send_finishing_session()?;
                wait_for_end(&mut session_rx).await;
                break;
            }
            session = session_rx.recv() => match session {
                Some(session) if session.state.is_terminal() => {
                    println!("Session {} by the server", session.state);
                    break;
                }
                Some(_) => {}
                None => break,
            },
            line = lines.next_line() => match line? {
                Some(line) => {
                    if let Err(e) = send_line(&client, &line) {
                        eprintln!("Error: {}", e);
                    }
                }
                None => {
                    client.send_finishing_session()?;
                    wait_for_end(&mut session_rx).await;
                    break;
                }
            },
        }
    }

    client.close()?;
    Ok(())
}

fn apply_cli_overrides(config: &mut Config, cli: &Cli) {
    if let Some(server) = &cli.server {
        config.client.server_address = server.clone();
    }
    if let Some(identity) = &cli.identity {
        config.client.identity = identity.clone();
    }
    if let Some(instance) = &cli.instance {
        config.client.instance = instance.clone();
    }
    if let Some(password) = &cli.password {
        config.client.password = Some(password.clone());
    }
}

/// Sends a `<to> <text>` line as a text message.
fn send_line(client: &ClientChannel, line: &str) -> anyhow::Result<()> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(());
    }
    let (to, text) = line
        .split_once(' ')
        .context("expected '<to> <text>'")?;
    let to: Node = to.parse()?;
    client.send_message(Message::text(to, text.trim()))?;
    Ok(())
}

async fn wait_for_end(sessions: &mut mpsc::UnboundedReceiver<Session>) {
    let result = tokio::time::timeout(FINISH_TIMEOUT, async {
        while let Some(session) = sessions.recv().await {
            if session.state.is_terminal() {
                return;
            }
        }
    })
    .await;
    if result.is_err() {
        tracing::warn!("Server did not confirm the end of the session");
    }
}

fn print_message(message: &Message) {
    let from = message
        .header
        .from
        .as_ref()
        .map(|n| n.to_string())
        .unwrap_or_else(|| "?".to_string());
    match message.content.as_str() {
        Some(text) => println!("[{}] {}", from, text),
        None => println!("[{}] ({}) {}", from, message.media_type, message.content),
    }
}

fn print_notification(notification: &Notification) {
    println!(
        "* {} {:?}",
        notification.header.id.as_deref().unwrap_or("?"),
        notification.event
    );
}
