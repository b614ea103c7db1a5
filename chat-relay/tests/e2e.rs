use std::{
    path::Path,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use anyhow::{Context, Result, bail, ensure};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);
const QUIET: Duration = Duration::from_millis(300);

#[tokio::test]
async fn cli_chat_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("chat_relay");
    let dir = tempfile::tempdir()?;
    let credentials = dir.path().join("users.db");

    register(&binary, &credentials, "alice", "secret1", "0123456789").await?;
    register(&binary, &credentials, "bob", "secret2", "9876543210").await?;

    let (_relay, addr) = spawn_relay(&binary).await?;
    let mut alice = spawn_client(&binary, &credentials, "alice", "secret1", &addr).await?;
    let mut bob = spawn_client(&binary, &credentials, "bob", "secret2", &addr).await?;
    // Give the relay a moment to process both identity frames.
    tokio::time::sleep(QUIET).await;

    // The relay never echoes back to the sender.
    alice.send_line("hello").await?;
    assert_eq!(bob.next_line("bob hearing alice").await?, "alice: hello");
    alice.expect_silence("alice's own message").await?;

    bob.send_line("Hi Alice!").await?;
    assert_eq!(alice.next_line("alice hearing bob").await?, "bob: Hi Alice!");
    bob.expect_silence("bob's own message").await?;

    alice.send_line("/quit").await?;
    assert_eq!(alice.next_line("alice quitting").await?, "*** leaving chat");
    assert!(alice.exit_status("alice").await?.success());

    // Bob can keep sending into an empty room.
    bob.send_line("anyone?").await?;
    bob.send_line("/quit").await?;
    assert_eq!(bob.next_line("bob quitting").await?, "*** leaving chat");
    assert!(bob.exit_status("bob").await?.success());

    Ok(())
}

#[tokio::test]
async fn client_exits_when_the_relay_goes_away() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("chat_relay");
    let dir = tempfile::tempdir()?;
    let credentials = dir.path().join("users.db");
    register(&binary, &credentials, "alice", "secret1", "0123456789").await?;

    let (mut relay, addr) = spawn_relay(&binary).await?;
    let mut alice = spawn_client(&binary, &credentials, "alice", "secret1", &addr).await?;

    relay.kill().await?;

    // Stdin stays open: the client must not wait for another keystroke.
    alice.exit_status("alice after relay shutdown").await?;
    drop(alice.stdin);
    Ok(())
}

#[tokio::test]
async fn wrong_password_never_connects() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("chat_relay");
    let dir = tempfile::tempdir()?;
    let credentials = dir.path().join("users.db");
    register(&binary, &credentials, "alice", "secret1", "0123456789").await?;

    // Nothing listens on this port; authentication must fail first.
    let output = Command::new(&binary)
        .arg("client")
        .arg("--username")
        .arg("alice")
        .arg("--password")
        .arg("not-her-password")
        .arg("--server")
        .arg("ws://127.0.0.1:9")
        .arg("--credentials")
        .arg(&credentials)
        .env("RUST_LOG", "warn")
        .env("NO_COLOR", "1")
        .stdin(Stdio::null())
        .output()
        .await
        .context("failed to run client")?;

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("invalid username or password"),
        "unexpected stderr: {stderr}"
    );
    Ok(())
}

#[tokio::test]
async fn duplicate_registration_is_refused() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("chat_relay");
    let dir = tempfile::tempdir()?;
    let credentials = dir.path().join("users.db");
    register(&binary, &credentials, "alice", "secret1", "0123456789").await?;

    let output = register_command(&binary, &credentials, "alice", "secret9", "0123456789")
        .output()
        .await?;

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("already exists"), "unexpected stderr: {stderr}");
    Ok(())
}

struct ClientProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl ClientProcess {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stdin.write_all(format!("{line}\n").as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn next_line(&mut self, what: &str) -> Result<String> {
        next_line(&mut self.stdout, what).await
    }

    async fn expect_silence(&mut self, what: &str) -> Result<()> {
        match timeout(QUIET, self.stdout.next_line()).await {
            Err(_) => Ok(()),
            Ok(line) => bail!("{what}: unexpectedly read {:?}", line?),
        }
    }

    /// Waits for the process to exit on its own, without closing its stdin.
    async fn exit_status(&mut self, what: &str) -> Result<ExitStatus> {
        timeout(READ_TIMEOUT, self.child.wait())
            .await
            .with_context(|| format!("{what} did not exit"))?
            .with_context(|| format!("failed to wait for {what}"))
    }
}

fn register_command(
    binary: &Path,
    credentials: &Path,
    username: &str,
    password: &str,
    mobile: &str,
) -> Command {
    let mut cmd = Command::new(binary);
    cmd.args(["register", "--username", username, "--password", password, "--mobile", mobile])
        .arg("--credentials")
        .arg(credentials)
        .env("NO_COLOR", "1")
        .stdin(Stdio::null());
    cmd
}

async fn register(
    binary: &Path,
    credentials: &Path,
    username: &str,
    password: &str,
    mobile: &str,
) -> Result<()> {
    let output = register_command(binary, credentials, username, password, mobile)
        .output()
        .await?;
    ensure!(
        output.status.success(),
        "registering {username} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(())
}

/// Starts a relay on an ephemeral port and returns it with its address.
/// The rest of its log output is discarded in the background.
async fn spawn_relay(binary: &Path) -> Result<(Child, String)> {
    let mut child = Command::new(binary)
        .args(["server", "--listen", "127.0.0.1:0"])
        .env("RUST_LOG", "info")
        .env("NO_COLOR", "1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .context("failed to spawn relay")?;

    let stdout = child.stdout.take().context("relay stdout not piped")?;
    let mut lines = BufReader::new(stdout).lines();
    let banner = next_line(&mut lines, "relay banner").await?;
    let addr = banner
        .rsplit(' ')
        .next()
        .filter(|addr| addr.contains(':'))
        .with_context(|| format!("no socket address in banner {banner:?}"))?
        .to_owned();

    let mut rest = lines.into_inner();
    tokio::spawn(async move { tokio::io::copy(&mut rest, &mut tokio::io::sink()).await });
    Ok((child, addr))
}

async fn spawn_client(
    binary: &Path,
    credentials: &Path,
    username: &str,
    password: &str,
    addr: &str,
) -> Result<ClientProcess> {
    let mut child = Command::new(binary)
        .args(["client", "--username", username])
        .arg("--server")
        .arg(format!("ws://{addr}"))
        .arg("--credentials")
        .arg(credentials)
        .env("CHAT_RELAY_PASSWORD", password)
        .env("RUST_LOG", "warn")
        .env("NO_COLOR", "1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn client {username}"))?;

    let mut process = ClientProcess {
        stdin: child.stdin.take().context("client stdin not piped")?,
        stdout: BufReader::new(child.stdout.take().context("client stdout not piped")?).lines(),
        child,
    };

    let banner = process.next_line("connection banner").await?;
    ensure!(
        banner == format!("*** connected as {username}"),
        "{username} printed {banner:?} instead of a connection banner"
    );
    Ok(process)
}

async fn next_line(lines: &mut Lines<BufReader<ChildStdout>>, what: &str) -> Result<String> {
    timeout(READ_TIMEOUT, lines.next_line())
        .await
        .with_context(|| format!("timed out waiting for {what}"))??
        .with_context(|| format!("output closed before {what}"))
}
