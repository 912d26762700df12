// ── Sink engine ──────────────────────────────────────────────────────────────
//
// Receives what a remote `scp -f` pushes. Frames are handled strictly in
// order; every ack is written only after the matching filesystem effect.

use crate::scp::progress::ProgressObserver;
use crate::scp::protocol::{write_ack, write_frame, FrameReader};
use crate::scp::types::{ProtocolFrame, TransferStats};
use log::{debug, info, warn};
use rscp_core::{ScpError, TransferOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

// ── Destination cursor ───────────────────────────────────────────────────────

struct OpenDir {
    path: PathBuf,
    /// Mode to restore on leave when the directory was created with extra
    /// owner bits.
    final_mode: Option<u32>,
}

/// Directory currently being populated. Never moves above `root`.
struct DestinationCursor {
    root: PathBuf,
    stack: Vec<OpenDir>,
    /// Destination that did not exist yet; the first top-level entry is
    /// written there under the requested name.
    rename_target: Option<PathBuf>,
}

impl DestinationCursor {
    async fn resolve(destination: &Path) -> Result<Self, ScpError> {
        let parent = || match destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        match tokio::fs::metadata(destination).await {
            Ok(meta) if meta.is_dir() => Ok(DestinationCursor {
                root: destination.to_path_buf(),
                stack: Vec::new(),
                rename_target: None,
            }),
            Ok(_) => Ok(DestinationCursor {
                root: parent(),
                stack: Vec::new(),
                rename_target: None,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DestinationCursor {
                root: parent(),
                stack: Vec::new(),
                rename_target: Some(destination.to_path_buf()),
            }),
            Err(e) => Err(ScpError::io(
                format!("cannot stat '{}'", destination.display()),
                e,
            )),
        }
    }

    fn current(&self) -> &Path {
        self.stack.last().map_or(self.root.as_path(), |d| d.path.as_path())
    }

    fn target(&mut self, name: &str) -> PathBuf {
        if self.stack.is_empty() {
            if let Some(path) = self.rename_target.take() {
                return path;
            }
        }
        self.current().join(name)
    }

    fn enter(&mut self, path: PathBuf, final_mode: Option<u32>) {
        self.stack.push(OpenDir { path, final_mode });
    }

    fn leave(&mut self) -> Result<OpenDir, ScpError> {
        self.stack
            .pop()
            .ok_or_else(|| ScpError::protocol("directory stack underflow: E without matching D"))
    }
}

/// A name from a `C`/`D` frame must be one plain path component.
fn validate_name(name: &str) -> Result<(), ScpError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\0')
        || (cfg!(windows) && name.contains('\\'));
    if bad {
        return Err(ScpError::protocol(format!("invalid name {:?} from peer", name)));
    }
    Ok(())
}

#[cfg(unix)]
async fn apply_mode(path: &Path, mode: u32) -> Result<(), ScpError> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o777))
        .await
        .map_err(|e| ScpError::io(format!("cannot set mode on '{}'", path.display()), e))
}

#[cfg(not(unix))]
async fn apply_mode(_path: &Path, _mode: u32) -> Result<(), ScpError> {
    Ok(())
}

/// Add the owner `bits` to an existing entry. Returns the mode it had when
/// bits were missing, so the caller can put it back.
#[cfg(unix)]
async fn grant_owner_bits(path: &Path, bits: u32) -> Result<Option<u32>, ScpError> {
    use std::os::unix::fs::PermissionsExt;
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| ScpError::io(format!("cannot stat '{}'", path.display()), e))?;
    let current = meta.permissions().mode() & 0o777;
    if current & bits == bits {
        return Ok(None);
    }
    apply_mode(path, current | bits).await?;
    Ok(Some(current))
}

#[cfg(not(unix))]
#[allow(clippy::permissions_set_readonly_false)]
async fn grant_owner_bits(path: &Path, _bits: u32) -> Result<Option<u32>, ScpError> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| ScpError::io(format!("cannot stat '{}'", path.display()), e))?;
    let mut perms = meta.permissions();
    if perms.readonly() {
        perms.set_readonly(false);
        tokio::fs::set_permissions(path, perms)
            .await
            .map_err(|e| ScpError::io(format!("cannot make '{}' writable", path.display()), e))?;
    }
    Ok(None)
}

// ── Engine ───────────────────────────────────────────────────────────────────

pub struct SinkEngine {
    chunk_size: usize,
    progress: Arc<dyn ProgressObserver>,
}

impl SinkEngine {
    pub fn new(options: &TransferOptions, progress: Arc<dyn ProgressObserver>) -> Self {
        SinkEngine {
            chunk_size: options.chunk_size(),
            progress,
        }
    }

    /// Run the receiving side until the peer finishes. `reader` is the
    /// remote's stdout, `writer` its stdin.
    pub async fn run<R, W>(
        &self,
        reader: R,
        mut writer: W,
        destination: &Path,
    ) -> Result<TransferStats, ScpError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let started = Instant::now();
        let mut frames = FrameReader::new(reader);
        let mut stats = TransferStats::default();

        let result = match DestinationCursor::resolve(destination).await {
            Ok(mut cursor) => {
                debug!("sink rooted at '{}'", cursor.root.display());
                self.receive(&mut frames, &mut writer, &mut cursor, &mut stats)
                    .await
            }
            Err(e) => Err(e),
        };
        stats.elapsed_ms = started.elapsed().as_millis() as u64;

        if let Err(e) = &result {
            if !matches!(e, ScpError::Remote(_)) {
                // Tell the peer why we stopped; it may already be gone.
                let _ = write_frame(&mut writer, &ProtocolFrame::Error(e.to_string())).await;
            }
        }

        let teardown = writer.shutdown().await;
        result?;
        if let Err(e) = teardown {
            warn!("closing stream to remote failed: {}", e);
            stats.teardown_error = Some(e.to_string());
        }
        info!(
            "received {} files, {} directories, {} bytes",
            stats.files, stats.directories, stats.bytes
        );
        Ok(stats)
    }

    async fn receive<R, W>(
        &self,
        frames: &mut FrameReader<R>,
        writer: &mut W,
        cursor: &mut DestinationCursor,
        stats: &mut TransferStats,
    ) -> Result<(), ScpError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        write_ack(writer).await?;

        loop {
            let frame = match frames.next_frame().await? {
                Some(f) => f,
                None => {
                    debug!("remote closed the stream");
                    return Ok(());
                }
            };

            match frame {
                ProtocolFrame::Ack => continue,
                ProtocolFrame::Error(message) => return Err(ScpError::Remote(message)),
                ProtocolFrame::DirEnter { mode, name } => {
                    validate_name(&name)?;
                    let path = cursor.target(&name);
                    let final_mode = self.create_dir(&path, mode).await?;
                    cursor.enter(path, final_mode);
                    stats.directories += 1;
                    write_ack(writer).await?;
                }
                ProtocolFrame::DirLeave => {
                    let dir = cursor.leave()?;
                    if let Some(mode) = dir.final_mode {
                        apply_mode(&dir.path, mode).await?;
                    }
                    write_ack(writer).await?;
                }
                ProtocolFrame::FileStart { mode, size, name } => {
                    validate_name(&name)?;
                    let path = cursor.target(&name);
                    self.receive_file(frames, writer, &path, &name, mode, size, stats)
                        .await?;
                }
                ProtocolFrame::Done => {
                    write_ack(writer).await?;
                    return Ok(());
                }
            }
        }
    }

    /// Create `path` if needed. Returns the mode still to apply on leave.
    async fn create_dir(&self, path: &Path, mode: u32) -> Result<Option<u32>, ScpError> {
        if tokio::fs::metadata(path).await.map_or(false, |m| m.is_dir()) {
            debug!("directory '{}' already exists", path.display());
            // A read-only directory from an earlier run must accept new entries.
            return grant_owner_bits(path, 0o700).await;
        }
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| ScpError::io(format!("cannot create directory '{}'", path.display()), e))?;

        let mode = mode & 0o777;
        // Keep the directory writable while its contents arrive.
        apply_mode(path, mode | 0o700).await?;
        Ok(if mode & 0o700 != 0o700 { Some(mode) } else { None })
    }

    #[allow(clippy::too_many_arguments)]
    async fn receive_file<R, W>(
        &self,
        frames: &mut FrameReader<R>,
        writer: &mut W,
        path: &Path,
        name: &str,
        mode: u32,
        size: u64,
        stats: &mut TransferStats,
    ) -> Result<(), ScpError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let started = Instant::now();
        if tokio::fs::metadata(path).await.map_or(false, |m| m.is_file()) {
            grant_owner_bits(path, 0o200).await?;
        }
        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| ScpError::io(format!("cannot create '{}'", path.display()), e))?;
        write_ack(writer).await?;
        self.progress.file_started(name, size);

        let mut buf = vec![0u8; self.chunk_size];
        let mut remaining = size;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = frames.read_payload(&mut buf[..want]).await?;
            if n == 0 {
                return Err(ScpError::protocol(format!(
                    "stream closed with {} bytes of '{}' outstanding",
                    remaining, name
                )));
            }
            file.write_all(&buf[..n])
                .await
                .map_err(|e| ScpError::io(format!("cannot write '{}'", path.display()), e))?;
            remaining -= n as u64;
            stats.bytes += n as u64;
            self.progress.file_progress(name, size - remaining, size);
        }
        file.flush()
            .await
            .map_err(|e| ScpError::io(format!("cannot write '{}'", path.display()), e))?;
        drop(file);
        apply_mode(path, mode).await?;

        frames.read_ack().await?;
        write_ack(writer).await?;

        stats.files += 1;
        self.progress.file_finished(name, size, started.elapsed());
        debug!("received '{}' ({} bytes)", path.display(), size);
        Ok(())
    }
}
