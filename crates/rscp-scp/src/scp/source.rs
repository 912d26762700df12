// ── Source engine ────────────────────────────────────────────────────────────
//
// Drives a remote `scp -t`. The whole send plan is computed from the local
// tree first, then streamed with an ack rendezvous after every header,
// payload and `E`.

use crate::scp::progress::ProgressObserver;
use crate::scp::protocol::{write_frame, FrameReader};
use crate::scp::types::{ProtocolFrame, TransferStats};
use log::{debug, info, warn};
use rscp_core::{ScpError, TransferOptions};
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use walkdir::WalkDir;

const DEFAULT_FILE_MODE: u32 = 0o644;
const DEFAULT_DIR_MODE: u32 = 0o755;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendStep {
    EnterDir { mode: u32, name: String },
    File { path: PathBuf, mode: u32, size: u64, name: String },
    LeaveDir,
}

#[cfg(unix)]
fn mode_of(meta: &Metadata, _default: u32) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn mode_of(_meta: &Metadata, default: u32) -> u32 {
    default
}

fn wire_name(name: String) -> Result<String, ScpError> {
    if name.contains('\n') {
        return Err(ScpError::protocol(format!(
            "cannot send {:?}: name contains a newline",
            name
        )));
    }
    Ok(name)
}

/// Final path component of `path`, resolving `.`/`..` through the
/// filesystem when needed.
fn base_name(path: &Path) -> Result<String, ScpError> {
    if let Some(name) = path.file_name() {
        return wire_name(name.to_string_lossy().into_owned());
    }
    let resolved = std::fs::canonicalize(path)
        .map_err(|e| ScpError::io(format!("cannot resolve '{}'", path.display()), e))?;
    match resolved.file_name() {
        Some(name) => wire_name(name.to_string_lossy().into_owned()),
        None => Err(ScpError::config(format!(
            "cannot send '{}': no file name",
            path.display()
        ))),
    }
}

fn file_step(path: &Path, meta: &Metadata, name: String) -> Result<SendStep, ScpError> {
    Ok(SendStep::File {
        path: path.to_path_buf(),
        mode: mode_of(meta, DEFAULT_FILE_MODE),
        size: meta.len(),
        name: wire_name(name)?,
    })
}

/// Build the ordered list of frames for `source`.
///
/// A directory requires `recursive`. Entries are visited sorted by name;
/// symlinks to files are followed and symlinks to directories are skipped.
pub fn plan(source: &Path, recursive: bool) -> Result<Vec<SendStep>, ScpError> {
    let meta = std::fs::metadata(source)
        .map_err(|e| ScpError::io(format!("cannot access '{}'", source.display()), e))?;

    if meta.is_file() {
        return Ok(vec![file_step(source, &meta, base_name(source)?)?]);
    }
    if !meta.is_dir() {
        return Err(ScpError::config(format!(
            "'{}' is not a regular file",
            source.display()
        )));
    }
    if !recursive {
        return Err(ScpError::config(format!(
            "'{}' is a directory (use recursive mode)",
            source.display()
        )));
    }

    let mut steps = Vec::new();
    let mut open_depths: Vec<usize> = Vec::new();

    for entry in WalkDir::new(source).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let context = format!(
                "cannot walk '{}'",
                e.path().unwrap_or(source).display()
            );
            ScpError::io(context, io::Error::from(e))
        })?;

        let depth = entry.depth();
        while open_depths.last().map_or(false, |d| *d >= depth) {
            open_depths.pop();
            steps.push(SendStep::LeaveDir);
        }

        let name = if depth == 0 {
            base_name(source)?
        } else {
            entry.file_name().to_string_lossy().into_owned()
        };
        let path = entry.path();
        let file_type = entry.file_type();

        if file_type.is_dir() {
            let meta = entry
                .metadata()
                .map_err(|e| ScpError::io(format!("cannot stat '{}'", path.display()), io::Error::from(e)))?;
            steps.push(SendStep::EnterDir {
                mode: mode_of(&meta, DEFAULT_DIR_MODE),
                name: wire_name(name)?,
            });
            open_depths.push(depth);
        } else if file_type.is_file() {
            let meta = entry
                .metadata()
                .map_err(|e| ScpError::io(format!("cannot stat '{}'", path.display()), io::Error::from(e)))?;
            steps.push(file_step(path, &meta, name)?);
        } else if file_type.is_symlink() {
            match std::fs::metadata(path) {
                Ok(meta) if meta.is_file() => steps.push(file_step(path, &meta, name)?),
                Ok(meta) if meta.is_dir() => {
                    warn!("skipping symlinked directory '{}'", path.display())
                }
                Ok(_) => debug!("skipping special file '{}'", path.display()),
                Err(e) => warn!("skipping dangling symlink '{}': {}", path.display(), e),
            }
        } else {
            debug!("skipping special file '{}'", path.display());
        }
    }

    for _ in open_depths {
        steps.push(SendStep::LeaveDir);
    }
    Ok(steps)
}

// ── Engine ───────────────────────────────────────────────────────────────────

pub struct SourceEngine {
    chunk_size: usize,
    recursive: bool,
    progress: Arc<dyn ProgressObserver>,
}

impl SourceEngine {
    pub fn new(options: &TransferOptions, progress: Arc<dyn ProgressObserver>) -> Self {
        SourceEngine {
            chunk_size: options.chunk_size(),
            recursive: options.recursive,
            progress,
        }
    }

    /// Send `source` to the peer. `reader` is the remote's stdout, `writer`
    /// its stdin.
    pub async fn run<R, W>(
        &self,
        reader: R,
        mut writer: W,
        source: &Path,
    ) -> Result<TransferStats, ScpError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let started = Instant::now();
        let mut frames = FrameReader::new(reader);
        let mut stats = TransferStats::default();

        let result = match plan(source, self.recursive) {
            Ok(steps) => self.send(&mut frames, &mut writer, steps, &mut stats).await,
            Err(e) => Err(e),
        };
        stats.elapsed_ms = started.elapsed().as_millis() as u64;

        let teardown = writer.shutdown().await;
        result?;
        if let Err(e) = teardown {
            warn!("closing stream to remote failed: {}", e);
            stats.teardown_error = Some(e.to_string());
        }
        info!(
            "sent {} files, {} directories, {} bytes",
            stats.files, stats.directories, stats.bytes
        );
        Ok(stats)
    }

    async fn send<R, W>(
        &self,
        frames: &mut FrameReader<R>,
        writer: &mut W,
        steps: Vec<SendStep>,
        stats: &mut TransferStats,
    ) -> Result<(), ScpError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        frames.read_ack().await?;

        for step in steps {
            match step {
                SendStep::EnterDir { mode, name } => {
                    write_frame(writer, &ProtocolFrame::DirEnter { mode, name }).await?;
                    frames.read_ack().await?;
                    stats.directories += 1;
                }
                SendStep::LeaveDir => {
                    write_frame(writer, &ProtocolFrame::DirLeave).await?;
                    frames.read_ack().await?;
                }
                SendStep::File {
                    path,
                    mode,
                    size,
                    name,
                } => {
                    self.send_file(frames, writer, &path, mode, size, name, stats)
                        .await?;
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_file<R, W>(
        &self,
        frames: &mut FrameReader<R>,
        writer: &mut W,
        path: &Path,
        mode: u32,
        size: u64,
        name: String,
        stats: &mut TransferStats,
    ) -> Result<(), ScpError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let started = Instant::now();
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| ScpError::io(format!("cannot open '{}'", path.display()), e))?;

        let header = ProtocolFrame::FileStart {
            mode,
            size,
            name: name.clone(),
        };
        write_frame(writer, &header).await?;
        frames.read_ack().await?;
        self.progress.file_started(&name, size);

        let mut buf = vec![0u8; self.chunk_size];
        let mut remaining = size;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = file
                .read(&mut buf[..want])
                .await
                .map_err(|e| ScpError::io(format!("cannot read '{}'", path.display()), e))?;
            if n == 0 {
                return Err(ScpError::io(
                    format!("'{}' shrank during transfer", path.display()),
                    io::Error::new(io::ErrorKind::UnexpectedEof, "file truncated"),
                ));
            }
            writer
                .write_all(&buf[..n])
                .await
                .map_err(|e| ScpError::io("write to remote", e))?;
            remaining -= n as u64;
            stats.bytes += n as u64;
            self.progress.file_progress(&name, size - remaining, size);
        }

        write_frame(writer, &ProtocolFrame::Ack).await?;
        frames.read_ack().await?;

        stats.files += 1;
        self.progress.file_finished(&name, size, started.elapsed());
        debug!("sent '{}' ({} bytes)", path.display(), size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scp::progress::NoProgress;

    fn options(recursive: bool) -> TransferOptions {
        TransferOptions {
            recursive,
            ..Default::default()
        }
    }

    #[test]
    fn test_plan_nested_tree_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("tree");
        std::fs::create_dir_all(root.join("b_sub")).unwrap();
        std::fs::create_dir_all(root.join("a_empty")).unwrap();
        std::fs::write(root.join("z.txt"), b"zz").unwrap();
        std::fs::write(root.join("b_sub").join("inner.txt"), b"i").unwrap();

        let steps = plan(&root, true).unwrap();
        let shape: Vec<String> = steps
            .iter()
            .map(|s| match s {
                SendStep::EnterDir { name, .. } => format!("D {}", name),
                SendStep::File { name, size, .. } => format!("C {} {}", name, size),
                SendStep::LeaveDir => "E".to_string(),
            })
            .collect();
        assert_eq!(
            shape,
            vec![
                "D tree",
                "D a_empty",
                "E",
                "D b_sub",
                "C inner.txt 1",
                "E",
                "C z.txt 2",
                "E"
            ]
        );
    }

    #[test]
    fn test_plan_directory_without_recursive() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(plan(dir.path(), false), Err(ScpError::Config(_))));
    }

    #[test]
    fn test_plan_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = plan(&dir.path().join("nope"), false).unwrap_err();
        assert!(matches!(err, ScpError::Io { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_plan_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("target.txt"), b"data").unwrap();
        std::os::unix::fs::symlink(outside.join("target.txt"), root.join("link.txt")).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("linkdir")).unwrap();

        let steps = plan(&root, true).unwrap();
        assert_eq!(steps.len(), 3);
        assert!(matches!(&steps[1], SendStep::File { name, size: 4, .. } if name == "link.txt"));
    }

    #[tokio::test]
    async fn test_single_file_wire_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello").unwrap();

        let engine = SourceEngine::new(&options(false), Arc::new(NoProgress));
        let acks: &[u8] = &[0, 0, 0];
        let mut sent = Vec::new();
        let stats = engine.run(acks, &mut sent, &path).await.unwrap();

        assert_eq!(stats.files, 1);
        assert_eq!(stats.bytes, 5);
        let header_end = sent.iter().position(|b| *b == b'\n').unwrap();
        let header = std::str::from_utf8(&sent[..header_end]).unwrap();
        assert!(header.starts_with('C'));
        assert!(header.ends_with(" 5 hello.txt"));
        assert_eq!(&sent[header_end + 1..], b"hello\x00");
    }

    #[tokio::test]
    async fn test_waits_for_each_ack() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"abc").unwrap();

        // only the initial and header acks arrive; the payload ack never does
        let engine = SourceEngine::new(&options(false), Arc::new(NoProgress));
        let acks: &[u8] = &[0, 0];
        let mut sent = Vec::new();
        let err = engine.run(acks, &mut sent, &path).await.unwrap_err();
        assert!(matches!(err, ScpError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_remote_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"abc").unwrap();

        let engine = SourceEngine::new(&options(false), Arc::new(NoProgress));
        let replies: &[u8] = b"\x00\x01scp: /ro/f: Read-only file system\n";
        let mut sent = Vec::new();
        match engine.run(replies, &mut sent, &path).await {
            Err(ScpError::Remote(msg)) => assert_eq!(msg, "scp: /ro/f: Read-only file system"),
            other => panic!("unexpected {:?}", other),
        }
        // nothing past the header was sent
        assert_eq!(sent.last(), Some(&b'\n'));
    }

    /// Accepts writes but fails to close, like a channel torn down early.
    struct FailingClose(Vec<u8>);

    impl AsyncWrite for FailingClose {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            self.0.extend_from_slice(buf);
            std::task::Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "channel closed",
            )))
        }
    }

    #[tokio::test]
    async fn test_close_failure_kept_beside_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"abc").unwrap();

        let engine = SourceEngine::new(&options(false), Arc::new(NoProgress));
        let acks: &[u8] = &[0, 0, 0];
        let stats = engine
            .run(acks, FailingClose(Vec::new()), &path)
            .await
            .unwrap();
        assert_eq!(stats.files, 1);
        assert_eq!(stats.bytes, 3);
        assert!(stats.teardown_error.unwrap().contains("channel closed"));
    }
}
