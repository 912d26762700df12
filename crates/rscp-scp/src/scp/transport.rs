// ── Transport collaborator ───────────────────────────────────────────────────
//
// The SSH layer itself lives outside this crate. It is reached through three
// seams: a connector that authenticates and returns a session, the session
// that can exec one command, and the running process with its two byte
// streams plus a completion future.

use async_trait::async_trait;
use futures::future::BoxFuture;
use rscp_auth::{HostKeyCheck, Keyring, PasswordProvider};
use rscp_core::ScpError;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// A running remote command.
pub struct RemoteProcess {
    /// Bytes to the remote program's stdin.
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    /// Bytes from the remote program's stdout.
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    /// Resolves once when the command exits; non-zero exit is an error.
    pub completion: BoxFuture<'static, Result<(), ScpError>>,
}

#[async_trait]
pub trait RemoteSession: Send {
    async fn exec(&mut self, command: &str) -> Result<RemoteProcess, ScpError>;
    async fn close(&mut self) -> Result<(), ScpError>;
}

/// Everything needed to open an authenticated session.
#[derive(Clone)]
pub struct ConnectRequest {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Identities offered in order; `Keyring::public_key(i)` returning
    /// `None` ends public key authentication.
    pub keyring: Arc<Keyring>,
    /// Password source for when key authentication is exhausted. The
    /// transport asks it at most once per connection.
    pub password: Option<Arc<dyn PasswordProvider>>,
    pub host_key_check: Arc<dyn HostKeyCheck>,
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("keys", &self.keyring.len())
            .field("password_provider", &self.password.is_some())
            .finish()
    }
}

#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, request: ConnectRequest) -> Result<Box<dyn RemoteSession>, ScpError>;
}

// ── Remote command line ──────────────────────────────────────────────────────

/// Role of the program started on the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteRole {
    /// `-f`: the peer reads files and sends them to us.
    Source,
    /// `-t`: the peer receives files from us.
    Sink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub role: RemoteRole,
    pub recursive: bool,
    pub quiet: bool,
    pub path: String,
}

impl RemoteCommand {
    /// `<program> -f|-t [-q] [-r] '<path>'`
    pub fn to_command_line(&self, program: &str) -> String {
        let mut cmd = String::from(program);
        cmd.push_str(match self.role {
            RemoteRole::Source => " -f",
            RemoteRole::Sink => " -t",
        });
        if self.quiet {
            cmd.push_str(" -q");
        }
        if self.recursive {
            cmd.push_str(" -r");
        }
        cmd.push(' ');
        cmd.push_str(&shell_escape(&self.path));
        cmd
    }

    /// Inverse of `to_command_line`, used by loopback and test transports.
    pub fn parse(command: &str) -> Result<Self, ScpError> {
        let mut rest = command.trim();
        let mut role = None;
        let mut recursive = false;
        let mut quiet = false;

        // skip the program name
        rest = rest
            .split_once(' ')
            .map(|(_, r)| r.trim_start())
            .ok_or_else(|| ScpError::config(format!("not an scp command: {:?}", command)))?;

        while let Some(flags) = rest.strip_prefix('-') {
            let (flag, tail) = flags.split_once(' ').unwrap_or((flags, ""));
            for c in flag.chars() {
                match c {
                    'f' => role = Some(RemoteRole::Source),
                    't' => role = Some(RemoteRole::Sink),
                    'r' => recursive = true,
                    'q' => quiet = true,
                    'd' | 'p' | 'v' => {}
                    other => {
                        return Err(ScpError::config(format!("unknown scp flag -{}", other)))
                    }
                }
            }
            rest = tail.trim_start();
        }

        let role = role.ok_or_else(|| ScpError::config("scp command without -f or -t"))?;
        if rest.is_empty() {
            return Err(ScpError::config("scp command without a path"));
        }
        Ok(RemoteCommand {
            role,
            recursive,
            quiet,
            path: shell_unescape(rest),
        })
    }
}

/// Single-quote `s` for a POSIX shell.
pub fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn shell_unescape(s: &str) -> String {
    if s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2 {
        s[1..s.len() - 1].replace("'\\''", "'")
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_escape_simple() {
        assert_eq!(shell_escape("/home/user/file.txt"), "'/home/user/file.txt'");
    }

    #[test]
    fn test_shell_escape_single_quotes() {
        assert_eq!(shell_escape("it's a file"), "'it'\\''s a file'");
    }

    #[test]
    fn test_shell_escape_special_chars() {
        assert_eq!(shell_escape("/path/$HOME/`x`"), "'/path/$HOME/`x`'");
    }

    #[test]
    fn test_command_line_flags() {
        let cmd = RemoteCommand {
            role: RemoteRole::Source,
            recursive: true,
            quiet: true,
            path: "/var/log".into(),
        };
        assert_eq!(cmd.to_command_line("scp"), "scp -f -q -r '/var/log'");

        let cmd = RemoteCommand {
            role: RemoteRole::Sink,
            recursive: false,
            quiet: false,
            path: ".".into(),
        };
        assert_eq!(cmd.to_command_line("/usr/bin/scp"), "/usr/bin/scp -t '.'");
    }

    #[test]
    fn test_parse_inverts_command_line() {
        let cmd = RemoteCommand {
            role: RemoteRole::Sink,
            recursive: true,
            quiet: false,
            path: "it's here/x".into(),
        };
        let parsed = RemoteCommand::parse(&cmd.to_command_line("scp")).unwrap();
        assert_eq!(parsed, cmd);
    }

    #[test]
    fn test_parse_combined_flags() {
        let parsed = RemoteCommand::parse("scp -rf /tmp/x").unwrap();
        assert_eq!(parsed.role, RemoteRole::Source);
        assert!(parsed.recursive);
        assert_eq!(parsed.path, "/tmp/x");
    }

    #[test]
    fn test_parse_missing_mode() {
        assert!(RemoteCommand::parse("scp -r /tmp").is_err());
        assert!(RemoteCommand::parse("scp -t").is_err());
    }
}
