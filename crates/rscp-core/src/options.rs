// ── Transfer options ─────────────────────────────────────────────────────────

use crate::error::ScpError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ── Serde default helpers ────────────────────────────────────────────────────

fn default_ssh_port() -> u16 {
    22
}
fn default_true() -> bool {
    true
}
fn default_buffer_size() -> usize {
    16 * 1024
}
fn default_remote_program() -> String {
    "scp".into()
}

const MIN_BUFFER_SIZE: usize = 512;
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Immutable configuration shared read-only by both engines and the
/// orchestrator for the lifetime of one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferOptions {
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub quiet: bool,
    #[serde(default)]
    pub verbose: bool,
    /// Unknown or mismatching hosts are rejected when set.
    #[serde(default = "default_true")]
    pub check_known_hosts: bool,
    /// Identity file; default identity files are tried when absent.
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    /// Trust store location; `~/.ssh/known_hosts` when absent.
    #[serde(default)]
    pub known_hosts_file: Option<PathBuf>,
    /// Chunk size for streaming file payloads.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Program invoked on the peer (`scp -f` / `scp -t`).
    #[serde(default = "default_remote_program")]
    pub remote_program: String,
}

impl Default for TransferOptions {
    fn default() -> Self {
        TransferOptions {
            port: default_ssh_port(),
            recursive: false,
            quiet: false,
            verbose: false,
            check_known_hosts: default_true(),
            key_file: None,
            known_hosts_file: None,
            buffer_size: default_buffer_size(),
            remote_program: default_remote_program(),
        }
    }
}

impl TransferOptions {
    pub fn from_json_str(json: &str) -> Result<Self, ScpError> {
        serde_json::from_str(json).map_err(|e| ScpError::config(format!("invalid options: {}", e)))
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ScpError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ScpError::io(format!("cannot read '{}'", path.display()), e))?;
        Self::from_json_str(&text)
    }

    /// Payload chunk size, clamped so a hostile config cannot ask for
    /// a zero-sized or unbounded buffer.
    pub fn chunk_size(&self) -> usize {
        self.buffer_size.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE)
    }

    /// Resolved trust store path.
    pub fn known_hosts_path(&self) -> Option<PathBuf> {
        self.known_hosts_file
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts")))
    }
}
