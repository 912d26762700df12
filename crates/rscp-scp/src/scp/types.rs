// ── Types ─────────────────────────────────────────────────────────────────────

use serde::{Deserialize, Serialize};

/// Status byte: ok.
pub const SCP_OK: u8 = 0x00;
/// Status byte: error, message follows on the same line.
pub const SCP_WARNING: u8 = 0x01;
/// Status byte: fatal error as emitted by OpenSSH scp.
pub const SCP_ERROR: u8 = 0x02;

// ── Wire frames ──────────────────────────────────────────────────────────────

/// One protocol unit exchanged between source and sink. The payload that
/// follows a `FileStart` is streamed separately and is not part of the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolFrame {
    Ack,
    Error(String),
    DirEnter { mode: u32, name: String },
    DirLeave,
    FileStart { mode: u32, size: u64, name: String },
    Done,
}

impl ProtocolFrame {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ProtocolFrame::Ack => vec![SCP_OK],
            ProtocolFrame::Error(message) => {
                let mut out = Vec::with_capacity(message.len() + 2);
                out.push(SCP_WARNING);
                out.extend_from_slice(message.as_bytes());
                out.push(b'\n');
                out
            }
            ProtocolFrame::DirEnter { mode, name } => {
                format!("D{:04o} 0 {}\n", mode & 0o7777, name).into_bytes()
            }
            ProtocolFrame::DirLeave => b"E\n".to_vec(),
            ProtocolFrame::FileStart { mode, size, name } => {
                format!("C{:04o} {} {}\n", mode & 0o7777, size, name).into_bytes()
            }
            ProtocolFrame::Done => vec![b'\n'],
        }
    }
}

// ── Transfer results ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferDirection {
    /// Remote → local, local engine is the sink.
    Download,
    /// Local → remote, local engine is the source.
    Upload,
    /// Local → local plain copy.
    Local,
}

/// Counters collected by an engine over one transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStats {
    pub files: u64,
    pub directories: u64,
    pub bytes: u64,
    pub elapsed_ms: u64,
    /// Failure closing the outbound stream after an otherwise successful
    /// transfer.
    #[serde(default)]
    pub teardown_error: Option<String>,
}

impl TransferStats {
    pub fn bytes_per_sec(&self) -> f64 {
        if self.elapsed_ms == 0 {
            return self.bytes as f64;
        }
        self.bytes as f64 / (self.elapsed_ms as f64 / 1000.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReport {
    pub direction: TransferDirection,
    pub source: String,
    pub destination: String,
    pub stats: TransferStats,
}
