// Shared fixtures for integration tests: an in-process "remote" that runs
// the engines on the other end of a duplex pipe.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::FutureExt;
use rscp_lib::scp::protocol::write_frame;
use rscp_lib::scp::source;
use rscp_lib::scp::{
    ConnectRequest, NoProgress, ProtocolFrame, RemoteCommand, RemoteProcess, RemoteRole,
    RemoteSession, SessionConnector, SinkEngine, SourceEngine,
};
use rscp_lib::{ScpError, TransferOptions};
use ssh_key::rand_core::OsRng;
use ssh_key::{Algorithm, PrivateKey};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;

pub const LOOPBACK_HOST: &str = "loopback.test";

/// Connector that verifies a fixed host key and hands out loopback sessions.
pub struct LoopbackConnector {
    host_key: PrivateKey,
    /// Command lines executed so far, in order.
    pub commands: Arc<Mutex<Vec<String>>>,
    pub closed: Arc<Mutex<usize>>,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        LoopbackConnector {
            host_key: PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap(),
            commands: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(Mutex::new(0)),
        }
    }

    /// `known_hosts` line trusting this connector's host key.
    pub fn known_hosts_line(&self, pattern: &str) -> String {
        format!("{} {}\n", pattern, self.host_key.public_key().to_openssh().unwrap())
    }
}

#[async_trait]
impl SessionConnector for LoopbackConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<Box<dyn RemoteSession>, ScpError> {
        let blob = self
            .host_key
            .public_key()
            .to_bytes()
            .map_err(|e| ScpError::Transport(e.to_string()))?;
        request
            .host_key_check
            .check(&format!("{}:{}", request.host, request.port), &blob)?;

        if request.keyring.is_empty() {
            let password = request
                .password
                .as_ref()
                .and_then(|p| p.password(&request.user, &request.host));
            if password.is_none() {
                return Err(ScpError::Transport("authentication failed".into()));
            }
        }

        Ok(Box::new(LoopbackSession {
            commands: self.commands.clone(),
            closed: self.closed.clone(),
        }))
    }
}

pub struct LoopbackSession {
    commands: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<usize>>,
}

#[async_trait]
impl RemoteSession for LoopbackSession {
    async fn exec(&mut self, command: &str) -> Result<RemoteProcess, ScpError> {
        self.commands.lock().unwrap().push(command.to_string());
        let cmd = RemoteCommand::parse(command)?;
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let (stdout, stdin) = tokio::io::split(local);

        let handle = tokio::spawn(serve(cmd, remote));
        let completion = async move {
            match handle.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(ScpError::Transport(format!("remote scp exited with status 1: {}", e))),
                Err(e) => Err(ScpError::Transport(e.to_string())),
            }
        }
        .boxed();

        Ok(RemoteProcess {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            completion,
        })
    }

    async fn close(&mut self) -> Result<(), ScpError> {
        *self.closed.lock().unwrap() += 1;
        Ok(())
    }
}

/// Remote side of one exec: run the engine matching the role.
async fn serve(cmd: RemoteCommand, stream: tokio::io::DuplexStream) -> Result<(), ScpError> {
    let (reader, mut writer) = tokio::io::split(stream);
    let options = TransferOptions {
        recursive: cmd.recursive,
        quiet: true,
        ..Default::default()
    };
    let path = PathBuf::from(&cmd.path);

    match cmd.role {
        RemoteRole::Sink => {
            SinkEngine::new(&options, Arc::new(NoProgress))
                .run(reader, writer, &path)
                .await?;
        }
        RemoteRole::Source => {
            if let Err(e) = source::plan(&path, cmd.recursive) {
                write_frame(&mut writer, &ProtocolFrame::Error(format!("scp: {}", e))).await?;
                let _ = writer.shutdown().await;
                return Err(e);
            }
            SourceEngine::new(&options, Arc::new(NoProgress))
                .run(reader, writer, &path)
                .await?;
        }
    }
    Ok(())
}

// ── Tree helpers ─────────────────────────────────────────────────────────────

/// Build a small tree: nested dirs, an empty dir, an empty file.
pub fn populate_tree(root: &Path) {
    std::fs::create_dir_all(root.join("sub/deeper")).unwrap();
    std::fs::create_dir_all(root.join("empty")).unwrap();
    std::fs::write(root.join("a.txt"), b"hello world\n").unwrap();
    std::fs::write(root.join("zero.bin"), b"").unwrap();
    std::fs::write(root.join("sub/b.bin"), (0..=255u8).cycle().take(70_000).collect::<Vec<_>>())
        .unwrap();
    std::fs::write(root.join("sub/deeper/c.txt"), b"deep\n").unwrap();
}

/// Relative path and contents (None for directories) of every entry, sorted.
pub fn snapshot(root: &Path) -> Vec<(PathBuf, Option<Vec<u8>>)> {
    let mut entries: Vec<_> = walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|e| e.unwrap())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
            let contents = if e.file_type().is_dir() {
                None
            } else {
                Some(std::fs::read(e.path()).unwrap())
            };
            (rel, contents)
        })
        .collect();
    entries.sort();
    entries
}
