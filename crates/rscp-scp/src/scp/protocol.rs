// ── Frame codec ──────────────────────────────────────────────────────────────
//
// Reading side: one command byte, then for text frames one newline-terminated
// detail line. Lines are bounded so a hostile peer cannot make us buffer an
// unbounded header.

use crate::scp::types::{ProtocolFrame, SCP_ERROR, SCP_OK, SCP_WARNING};
use rscp_core::ScpError;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Longest accepted detail line, terminator excluded.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

pub struct FrameReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        FrameReader {
            inner: BufReader::new(reader),
        }
    }

    /// Next byte, or `None` at end of stream.
    pub async fn read_byte(&mut self) -> Result<Option<u8>, ScpError> {
        let buf = self
            .inner
            .fill_buf()
            .await
            .map_err(|e| ScpError::io("read from remote", e))?;
        match buf.first().copied() {
            Some(b) => {
                self.inner.consume(1);
                Ok(Some(b))
            }
            None => Ok(None),
        }
    }

    /// Detail line without its `\n`. End of stream before the terminator is
    /// a protocol error.
    pub async fn read_line(&mut self) -> Result<String, ScpError> {
        match self.read_bounded_line().await? {
            (line, true) => Ok(line),
            (_, false) => Err(ScpError::protocol("stream ended inside a frame")),
        }
    }

    /// Error message line; a message cut short by end of stream is still
    /// returned.
    async fn read_message(&mut self) -> Result<String, ScpError> {
        let (line, _) = self.read_bounded_line().await?;
        Ok(line)
    }

    async fn read_bounded_line(&mut self) -> Result<(String, bool), ScpError> {
        let mut line = Vec::new();
        loop {
            let buf = self
                .inner
                .fill_buf()
                .await
                .map_err(|e| ScpError::io("read from remote", e))?;
            if buf.is_empty() {
                return Ok((String::from_utf8_lossy(&line).into_owned(), false));
            }
            let (take, done) = match buf.iter().position(|b| *b == b'\n') {
                Some(pos) => (pos, true),
                None => (buf.len(), false),
            };
            if line.len() + take > MAX_LINE_LENGTH {
                return Err(ScpError::protocol(format!(
                    "frame line exceeds {} bytes",
                    MAX_LINE_LENGTH
                )));
            }
            line.extend_from_slice(&buf[..take]);
            self.inner.consume(if done { take + 1 } else { take });
            if done {
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok((String::from_utf8_lossy(&line).into_owned(), true));
            }
        }
    }

    /// Decode the next frame. `Ok(None)` when the stream ends cleanly on a
    /// frame boundary.
    pub async fn next_frame(&mut self) -> Result<Option<ProtocolFrame>, ScpError> {
        let command = match self.read_byte().await? {
            Some(b) => b,
            None => return Ok(None),
        };

        let frame = match command {
            SCP_OK => ProtocolFrame::Ack,
            SCP_WARNING | SCP_ERROR => ProtocolFrame::Error(self.read_message().await?),
            b'D' => {
                let line = self.read_line().await?;
                let (mode, _, name) = parse_header('D', &line)?;
                ProtocolFrame::DirEnter { mode, name }
            }
            b'C' => {
                let line = self.read_line().await?;
                let (mode, size, name) = parse_header('C', &line)?;
                ProtocolFrame::FileStart { mode, size, name }
            }
            b'E' => {
                let rest = self.read_line().await?;
                if !rest.is_empty() {
                    return Err(ScpError::protocol(format!(
                        "unexpected data after E: {:?}",
                        rest
                    )));
                }
                ProtocolFrame::DirLeave
            }
            b'\n' => ProtocolFrame::Done,
            other => {
                return Err(ScpError::protocol(format!(
                    "command byte 0x{:02x} not implemented",
                    other
                )))
            }
        };
        Ok(Some(frame))
    }

    /// Wait for the peer's status byte: `0x00` ok, `0x01`/`0x02` carry a
    /// message that becomes `ScpError::Remote`.
    pub async fn read_ack(&mut self) -> Result<(), ScpError> {
        match self.read_byte().await? {
            Some(SCP_OK) => Ok(()),
            Some(SCP_WARNING) | Some(SCP_ERROR) => Err(ScpError::Remote(self.read_message().await?)),
            Some(other) => Err(ScpError::protocol(format!(
                "expected acknowledgement, got byte 0x{:02x}",
                other
            ))),
            None => Err(ScpError::protocol(
                "stream closed while waiting for acknowledgement",
            )),
        }
    }

    /// Raw payload bytes. Returns 0 at end of stream.
    pub async fn read_payload(&mut self, buf: &mut [u8]) -> Result<usize, ScpError> {
        self.inner
            .read(buf)
            .await
            .map_err(|e| ScpError::io("read from remote", e))
    }
}

/// `<octal-mode> <decimal-size> <name>` after the command byte.
pub fn parse_header(kind: char, line: &str) -> Result<(u32, u64, String), ScpError> {
    let mut parts = line.splitn(3, ' ');
    let (mode, size, name) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(s), Some(n)) => (m, s, n),
        _ => {
            return Err(ScpError::protocol(format!(
                "malformed {} header: {:?}",
                kind, line
            )))
        }
    };

    // `from_str_radix` and `parse` both allow a leading `+`; the wire does not.
    let digits = |field: &str| field.bytes().next().map_or(false, |b| b.is_ascii_digit());
    if !digits(mode) {
        return Err(ScpError::protocol(format!("invalid mode {:?} in {} header", mode, kind)));
    }
    if !digits(size) {
        return Err(ScpError::protocol(format!("invalid size {:?} in {} header", size, kind)));
    }

    let mode = u32::from_str_radix(mode, 8)
        .map_err(|_| ScpError::protocol(format!("invalid mode {:?} in {} header", mode, kind)))?;
    let size = size
        .parse::<u64>()
        .map_err(|_| ScpError::protocol(format!("invalid size {:?} in {} header", size, kind)))?;
    Ok((mode, size, name.to_string()))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &ProtocolFrame,
) -> Result<(), ScpError> {
    writer
        .write_all(&frame.encode())
        .await
        .map_err(|e| ScpError::io("write to remote", e))?;
    writer
        .flush()
        .await
        .map_err(|e| ScpError::io("write to remote", e))
}

pub async fn write_ack<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<(), ScpError> {
    write_frame(writer, &ProtocolFrame::Ack).await
}
