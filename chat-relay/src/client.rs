use std::{io, sync::Arc};

use anyhow::{Context, Result, bail};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader},
    net::TcpStream,
    select,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream,
    tungstenite::{self, Message},
};
use tracing::{info, warn};

use crate::{
    auth::{Authenticator, CredentialStore},
    cli::ClientArgs,
    display::DisplaySink,
    frame::{read_frame, write_frame},
};

pub type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Logs in, connects, and chats over stdin until `/quit`, ctrl-c, or
/// disconnect.
///
/// A pending stdin read may outlive this call; the caller should exit the
/// process rather than wait for the runtime to shut down.
pub async fn run(args: ClientArgs, display: Arc<dyn DisplaySink>) -> Result<()> {
    let store = CredentialStore::open(&args.credentials).with_context(|| {
        format!(
            "failed to open credential store {}",
            args.credentials.display()
        )
    })?;
    if let Err(err) = login(&store, &args.username, &args.password) {
        display.report_error(&err.to_string());
        return Err(err);
    }

    let socket = match connect(&args.server).await {
        Ok(socket) => socket,
        Err(err) => {
            display.report_error(&format!("{err:#}"));
            return Err(err);
        }
    };

    let stdin = BufReader::new(tokio::io::stdin());
    run_connector(socket, args.username.trim(), stdin, display).await
}

pub fn login<A>(auth: &A, username: &str, password: &str) -> Result<()>
where
    A: Authenticator + ?Sized,
{
    if !auth.authenticate(username, password) {
        bail!("invalid username or password");
    }
    Ok(())
}

pub async fn connect(url: &str) -> Result<ClientSocket> {
    let (socket, _response) = tokio_tungstenite::connect_async(url)
        .await
        .with_context(|| format!("failed to connect to server at {url}"))?;

    info!("connected to {url}");
    Ok(socket)
}

/// The text actually sent for a line typed by `identity`.
pub fn compose_message(identity: &str, text: &str) -> String {
    format!("{identity}: {text}")
}

/// Announces `identity`, then sends input lines and displays inbound frames
/// concurrently until input ends, the user quits, or the relay goes away.
pub async fn run_connector<S, I>(
    socket: WebSocketStream<S>,
    identity: &str,
    input: I,
    display: Arc<dyn DisplaySink>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    I: AsyncBufRead + Unpin,
{
    let (mut sink, stream) = socket.split();
    write_frame(&mut sink, identity)
        .await
        .context("failed to announce identity")?;
    display.append_line(&format!("*** connected as {identity}"));

    let mut receiver = tokio::spawn(receive_frames(stream, Arc::clone(&display)));
    let mut receiving = true;
    let mut lines = input.lines();

    let outcome = loop {
        select! {
            finished = &mut receiver => {
                receiving = false;
                if let Err(error) = finished {
                    warn!(?error, "receive task failed");
                }
                break Ok(());
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break Ok(());
            }
            line = lines.next_line() => {
                match handle_input(line, identity, &mut sink, display.as_ref()).await {
                    Ok(true) => {}
                    Ok(false) => break Ok(()),
                    Err(err) => {
                        display.report_error(&format!("{err:#}"));
                        break Err(err);
                    }
                }
            }
        }
    };

    if receiving {
        receiver.abort();
        // The task holds a display clone until it is actually dropped.
        let _ = receiver.await;
    }
    shutdown_connection(&mut sink).await;
    outcome
}

async fn handle_input<K>(
    line: io::Result<Option<String>>,
    identity: &str,
    sink: &mut K,
    display: &dyn DisplaySink,
) -> Result<bool>
where
    K: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let Some(line) = line.context("failed to read input")? else {
        return Ok(false);
    };

    let text = line.trim();
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        display.append_line("*** leaving chat");
        return Ok(false);
    }

    write_frame(sink, compose_message(identity, text))
        .await
        .context("failed to send message")?;
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn receive_frames<R>(mut stream: R, display: Arc<dyn DisplaySink>)
where
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        match read_frame(&mut stream).await {
            Ok(Some(text)) => display.append_line(&text),
            Ok(None) => {
                display.append_line("*** server closed the connection");
                break;
            }
            Err(err) => {
                display.report_error(&format!("connection error: {err}"));
                break;
            }
        }
    }
}

async fn shutdown_connection<K>(sink: &mut K)
where
    K: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    if let Err(error) = sink.close().await {
        warn!(%error, "failed to close websocket cleanly");
    }
}
