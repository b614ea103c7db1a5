use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use chat_relay::{
    auth::{CredentialStore, NewAccount},
    cli::{Cli, Command, RegisterArgs},
    client,
    config::RelayConfig,
    display::TerminalSink,
    server::RelayServer,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn register(args: RegisterArgs) -> Result<()> {
    let store = CredentialStore::open(&args.credentials).with_context(|| {
        format!(
            "failed to open credential store {}",
            args.credentials.display()
        )
    })?;
    store.register(&NewAccount {
        username: args.username.clone(),
        password: args.password,
        mobile: args.mobile,
    })?;
    println!("account created: {}", args.username.trim());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => {
            let config = RelayConfig::from(&args);
            let server = RelayServer::bind(&config).await?;
            let addr = server.local_addr()?;
            info!("relay listening on {}", addr);
            if let Err(err) = server.run_until_ctrl_c().await {
                warn!("relay exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Client(args) => {
            let (terminal, printer) = TerminalSink::spawn();
            let outcome = client::run(args, Arc::new(terminal)).await;
            if let Err(error) = printer.await {
                warn!(?error, "terminal printer failed");
            }
            // Tokio's stdin reader blocks a thread until the next line; leaving
            // through runtime shutdown would wait for a keystroke.
            let code = match outcome {
                Ok(()) => 0,
                Err(err) => {
                    eprintln!("Error: {err:?}");
                    1
                }
            };
            std::process::exit(code);
        }
        Command::Register(args) => register(args)?,
    }

    Ok(())
}
