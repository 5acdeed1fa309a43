//! Transport abstraction and the stdio transport.
//!
//! The stdio transport spawns the server as a child process and exchanges
//! newline-delimited JSON over its stdin/stdout. The server's stderr is
//! inherited so its logs show up next to ours.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use crate::error::TransportError;

/// Grace period between SIGTERM and a hard kill.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// A bidirectional channel of JSON-RPC messages.
///
/// Only `Send` is required: connections keep their transport behind a
/// mutex, which is what makes them shareable.
#[async_trait]
pub trait Transport: Send {
    /// Send one serialized message.
    async fn send(&mut self, message: &str) -> Result<(), TransportError>;

    /// Receive the next serialized message.
    async fn receive(&mut self) -> Result<String, TransportError>;

    /// Close the transport and release its resources.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Whether the transport can still be used.
    fn is_connected(&self) -> bool;
}

/// Transport over a child process's stdin/stdout.
pub struct StdioTransport {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    connected: bool,
}

impl StdioTransport {
    /// Spawn `command` with `args`, extra environment variables and an
    /// optional working directory.
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        working_dir: Option<&Path>,
    ) -> Result<Self, TransportError> {
        debug!(command, ?args, "Spawning MCP server process");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| TransportError::spawn_failed(command, e))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(TransportError::spawn_failed(
                command,
                std::io::Error::other("child stdio was not captured"),
            ));
        };

        debug!(pid = ?child.id(), "MCP server process started");

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            connected: true,
        })
    }

    /// Process ID of the server, while it is running.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    #[cfg(unix)]
    async fn terminate(&mut self, pid: u32) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        debug!(pid, "Sending SIGTERM to MCP server");
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);

        match tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(_) => debug!(pid, "MCP server exited"),
            Err(_) => {
                warn!(pid, "MCP server ignored SIGTERM, killing");
                let _ = self.child.kill().await;
            }
        }
    }

    #[cfg(not(unix))]
    async fn terminate(&mut self, _pid: u32) {
        let _ = self.child.kill().await;
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        debug!(raw = message, "-> stdio");

        let mut frame = Vec::with_capacity(message.len() + 1);
        frame.extend_from_slice(message.as_bytes());
        frame.push(b'\n');

        self.stdin
            .write_all(&frame)
            .await
            .map_err(TransportError::WriteError)?;
        self.stdin.flush().await.map_err(TransportError::WriteError)
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        loop {
            let mut line = String::new();
            let read = self
                .stdout
                .read_line(&mut line)
                .await
                .map_err(TransportError::ReadError)?;

            if read == 0 {
                self.connected = false;
                return Err(TransportError::ConnectionClosed);
            }

            let message = line.trim_end();
            if message.is_empty() {
                continue;
            }

            debug!(raw = message, "<- stdio");
            return Ok(message.to_string());
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;

        if let Some(pid) = self.child.id() {
            self.terminate(pid).await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    async fn cat() -> StdioTransport {
        StdioTransport::spawn("cat", &[], &HashMap::new(), None)
            .await
            .expect("cat should be available on unix")
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let mut transport = cat().await;
        assert!(transport.is_connected());
        assert!(transport.pid().is_some());

        transport.send(r#"{"jsonrpc":"2.0","method":"x"}"#).await.unwrap();
        assert_eq!(transport.receive().await.unwrap(), r#"{"jsonrpc":"2.0","method":"x"}"#);

        transport.close().await.unwrap();
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_blank_lines_are_skipped() {
        let mut transport = cat().await;
        transport.send("").await.unwrap();
        transport.send("{}").await.unwrap();
        assert_eq!(transport.receive().await.unwrap(), "{}");
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_transport_rejects_io() {
        let mut transport = cat().await;
        transport.close().await.unwrap();

        assert!(matches!(transport.send("{}").await, Err(TransportError::NotConnected)));
        assert!(matches!(transport.receive().await, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_process_exit_is_connection_closed() {
        let mut transport = StdioTransport::spawn("true", &[], &HashMap::new(), None)
            .await
            .unwrap();
        assert!(matches!(transport.receive().await, Err(TransportError::ConnectionClosed)));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let result = StdioTransport::spawn("mcplink-no-such-server", &[], &HashMap::new(), None).await;
        assert!(matches!(result, Err(TransportError::SpawnFailed { .. })));
    }

    #[tokio::test]
    async fn test_env_and_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = HashMap::new();
        env.insert("MCPLINK_TEST_VALUE".to_string(), "forty-two".to_string());

        let mut transport = StdioTransport::spawn(
            "sh",
            &["-c".to_string(), "echo \"$MCPLINK_TEST_VALUE\"; pwd".to_string()],
            &env,
            Some(dir.path()),
        )
        .await
        .unwrap();

        assert_eq!(transport.receive().await.unwrap(), "forty-two");
        let cwd = transport.receive().await.unwrap();
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(std::path::PathBuf::from(cwd).canonicalize().unwrap(), expected);
    }
}
