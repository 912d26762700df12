// ── ScpService: transfer orchestration ───────────────────────────────────────

use crate::scp::progress::{LogProgress, ProgressObserver};
use crate::scp::sink::SinkEngine;
use crate::scp::source::{self, SourceEngine};
use crate::scp::transport::{
    ConnectRequest, RemoteCommand, RemoteProcess, RemoteRole, RemoteSession, SessionConnector,
};
use crate::scp::types::{TransferDirection, TransferReport, TransferStats};
use log::{debug, info, warn};
use rscp_auth::{
    AcceptAnyHostKey, CredentialLoader, HostKeyCheck, Keyring, KnownHostsVerifier,
    PassphraseProvider, PasswordProvider,
};
use rscp_core::{AuthError, ScpError, TransferEndpoint, TransferOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};

/// Engine plus its local path, moved into the protocol task.
enum Job {
    Receive {
        engine: SinkEngine,
        destination: PathBuf,
    },
    Send {
        engine: SourceEngine,
        source: PathBuf,
    },
}

impl Job {
    async fn run(
        self,
        stdout: Box<dyn AsyncRead + Send + Unpin>,
        stdin: Box<dyn AsyncWrite + Send + Unpin>,
    ) -> Result<TransferStats, ScpError> {
        match self {
            Job::Receive {
                engine,
                destination,
            } => engine.run(stdout, stdin, &destination).await,
            Job::Send { engine, source } => engine.run(stdout, stdin, &source).await,
        }
    }
}

pub struct ScpService {
    options: TransferOptions,
    connector: Arc<dyn SessionConnector>,
    password: Option<Arc<dyn PasswordProvider>>,
    passphrase: Option<Arc<dyn PassphraseProvider>>,
    progress: Arc<dyn ProgressObserver>,
}

impl ScpService {
    pub fn new(options: TransferOptions, connector: Arc<dyn SessionConnector>) -> Self {
        let progress = Arc::new(LogProgress::new(options.quiet));
        ScpService {
            options,
            connector,
            password: None,
            passphrase: None,
            progress,
        }
    }

    pub fn with_password_provider(mut self, provider: Arc<dyn PasswordProvider>) -> Self {
        self.password = Some(provider);
        self
    }

    pub fn with_passphrase_provider(mut self, provider: Arc<dyn PassphraseProvider>) -> Self {
        self.passphrase = Some(provider);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressObserver>) -> Self {
        self.progress = progress;
        self
    }

    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    /// Copy `source` to `destination`, each in `[[user@]host:]path` form.
    pub async fn copy(&self, source: &str, destination: &str) -> Result<TransferReport, ScpError> {
        let src = TransferEndpoint::parse(source)?;
        let dst = TransferEndpoint::parse(destination)?;

        let (direction, stats) = match (src.is_remote(), dst.is_remote()) {
            (true, true) => {
                return Err(ScpError::config(
                    "remote to remote copy is not supported",
                ))
            }
            (false, false) => (TransferDirection::Local, self.copy_local(&src, &dst).await?),
            (true, false) => (TransferDirection::Download, self.download(&src, &dst).await?),
            (false, true) => (TransferDirection::Upload, self.upload(&src, &dst).await?),
        };

        Ok(TransferReport {
            direction,
            source: src.to_string(),
            destination: dst.to_string(),
            stats,
        })
    }

    async fn download(
        &self,
        src: &TransferEndpoint,
        dst: &TransferEndpoint,
    ) -> Result<TransferStats, ScpError> {
        let command = RemoteCommand {
            role: RemoteRole::Source,
            recursive: self.options.recursive,
            quiet: self.options.quiet,
            path: src.remote_path().to_string(),
        };
        let job = Job::Receive {
            engine: SinkEngine::new(&self.options, self.progress.clone()),
            destination: dst.local_path(),
        };
        self.run_remote(src, command, job).await
    }

    async fn upload(
        &self,
        src: &TransferEndpoint,
        dst: &TransferEndpoint,
    ) -> Result<TransferStats, ScpError> {
        let source = src.local_path();
        // Fail on a missing source or a directory without -r before dialing.
        source::plan(&source, self.options.recursive)?;

        let command = RemoteCommand {
            role: RemoteRole::Sink,
            recursive: self.options.recursive,
            quiet: self.options.quiet,
            path: dst.remote_path().to_string(),
        };
        let job = Job::Send {
            engine: SourceEngine::new(&self.options, self.progress.clone()),
            source,
        };
        self.run_remote(dst, command, job).await
    }

    async fn copy_local(
        &self,
        src: &TransferEndpoint,
        dst: &TransferEndpoint,
    ) -> Result<TransferStats, ScpError> {
        let from = src.local_path();
        let meta = tokio::fs::metadata(&from)
            .await
            .map_err(|e| ScpError::io(format!("cannot access '{}'", from.display()), e))?;
        if meta.is_dir() {
            return Err(ScpError::config(format!(
                "'{}' is a directory; local directory copy is not supported",
                from.display()
            )));
        }

        let name = from
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut to = dst.local_path();
        if tokio::fs::metadata(&to).await.map_or(false, |m| m.is_dir()) {
            to = to.join(&name);
        }

        let started = Instant::now();
        self.progress.file_started(&name, meta.len());
        let bytes = tokio::fs::copy(&from, &to).await.map_err(|e| {
            ScpError::io(
                format!("cannot copy '{}' to '{}'", from.display(), to.display()),
                e,
            )
        })?;
        self.progress.file_finished(&name, bytes, started.elapsed());

        Ok(TransferStats {
            files: 1,
            bytes,
            elapsed_ms: started.elapsed().as_millis() as u64,
            ..Default::default()
        })
    }

    // ── Connection setup ─────────────────────────────────────────────────────

    async fn run_remote(
        &self,
        remote: &TransferEndpoint,
        command: RemoteCommand,
        job: Job,
    ) -> Result<TransferStats, ScpError> {
        let request = self.connect_request(remote)?;
        info!(
            "connecting to {}@{}:{}",
            request.user, request.host, request.port
        );
        let mut session = self.connector.connect(request).await?;

        let command_line = command.to_command_line(&self.options.remote_program);
        let result = exec_and_transfer(session.as_mut(), &command_line, job).await;

        if let Err(e) = session.close().await {
            warn!("closing session failed: {}", e);
        }
        result
    }

    fn connect_request(&self, remote: &TransferEndpoint) -> Result<ConnectRequest, ScpError> {
        let host = remote
            .host
            .clone()
            .ok_or_else(|| ScpError::config("remote endpoint without host"))?;
        let user = match &remote.user {
            Some(u) => u.clone(),
            None => local_user_name()?,
        };

        let keyring = self.build_keyring(&user, &host)?;
        Ok(ConnectRequest {
            host,
            port: self.options.port,
            user,
            keyring: Arc::new(keyring),
            password: self.password.clone(),
            host_key_check: self.host_key_check()?,
        })
    }

    fn build_keyring(&self, user: &str, host: &str) -> Result<Keyring, ScpError> {
        let mut loader = CredentialLoader::new();
        if let Some(provider) = &self.passphrase {
            loader = loader.with_passphrase_provider(provider.clone());
        }

        let mut keyring = Keyring::new();
        let results = match &self.options.key_file {
            Some(path) => keyring.load_id_files(&loader, std::slice::from_ref(path)),
            None => keyring.load_default_id_files(&loader),
        };
        debug!("keyring holds {} identities", keyring.len());

        if keyring.is_empty() && self.password.is_none() {
            // An explicitly named key that failed says more than "no credential".
            if self.options.key_file.is_some() {
                if let Some(Err(e)) = results.into_iter().next() {
                    return Err(e.into());
                }
            }
            return Err(AuthError::NoCredential {
                user: user.to_string(),
                host: host.to_string(),
            }
            .into());
        }
        Ok(keyring)
    }

    fn host_key_check(&self) -> Result<Arc<dyn HostKeyCheck>, ScpError> {
        if !self.options.check_known_hosts {
            warn!("host key checking is disabled; any host key will be accepted");
            return Ok(Arc::new(AcceptAnyHostKey));
        }
        let path = self
            .options
            .known_hosts_path()
            .ok_or_else(|| ScpError::config("cannot locate known_hosts: no home directory"))?;
        Ok(Arc::new(KnownHostsVerifier::from_file(&path)?))
    }
}

/// Start `command`, run the engine in its own task and wait for both the
/// engine and the remote command. The more specific failure wins.
async fn exec_and_transfer(
    session: &mut dyn RemoteSession,
    command: &str,
    job: Job,
) -> Result<TransferStats, ScpError> {
    debug!("exec: {}", command);
    let RemoteProcess {
        stdin,
        stdout,
        completion,
    } = session.exec(command).await?;

    let task = tokio::spawn(job.run(stdout, stdin));
    let (exit, joined) = tokio::join!(completion, task);
    let transfer = joined
        .unwrap_or_else(|e| Err(ScpError::Transport(format!("transfer task failed: {}", e))));

    match (transfer, exit) {
        (Ok(stats), Ok(())) => Ok(stats),
        (Ok(_), Err(exit)) => Err(exit),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(exit)) => {
            debug!("remote command also failed: {}", exit);
            Err(e.most_specific(exit))
        }
    }
}

fn local_user_name() -> Result<String, ScpError> {
    user_name_from(|var| std::env::var(var).ok())
}

fn user_name_from(lookup: impl Fn(&str) -> Option<String>) -> Result<String, ScpError> {
    for var in ["USER", "USERNAME"] {
        if let Some(name) = lookup(var) {
            debug!("remote user '{}' taken from ${}", name, var);
            return Ok(name);
        }
    }
    Err(ScpError::config(
        "cannot determine local user name; use user@host",
    ))
}
