use std::{net::SocketAddr, path::PathBuf};

use clap::{Args, Parser, Subcommand};

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8765";
pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8765";
pub const DEFAULT_CREDENTIALS: &str = "chat_credentials.db";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay, accepting websocket connections.
    Server(ServerArgs),
    /// Log in and chat with everyone connected to a relay.
    Client(ClientArgs),
    /// Create an account in the credential store.
    Register(RegisterArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address the relay should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = DEFAULT_LISTEN)]
    pub listen: SocketAddr,

    /// Frames buffered per connection before further messages to it are dropped.
    #[arg(long, default_value_t = 64)]
    pub outbound_capacity: usize,

    /// Give up on a single write to a peer after this many milliseconds.
    #[arg(long)]
    pub send_timeout_ms: Option<u64>,

    /// Drop connections that do not send their identity within this many seconds.
    #[arg(long)]
    pub registration_timeout_secs: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Account name; also the identity announced to the relay.
    #[arg(long)]
    pub username: String,

    #[arg(long, env = "CHAT_RELAY_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// WebSocket URL of the relay.
    #[arg(long, default_value = DEFAULT_SERVER_URL)]
    pub server: String,

    #[arg(long, default_value = DEFAULT_CREDENTIALS)]
    pub credentials: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct RegisterArgs {
    #[arg(long)]
    pub username: String,

    #[arg(long, env = "CHAT_RELAY_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Ten digit mobile number.
    #[arg(long)]
    pub mobile: String,

    #[arg(long, default_value = DEFAULT_CREDENTIALS)]
    pub credentials: PathBuf,
}
