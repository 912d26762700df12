// ── Error taxonomy ───────────────────────────────────────────────────────────

use std::io;
use thiserror::Error;

/// Failures raised while loading credentials or verifying the remote host.
///
/// All of these are terminal for the connection attempt; nothing is retried.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no private key found in '{0}'")]
    NoKeyFound(String),

    #[error("unsupported private key type '{0}'")]
    UnsupportedKeyType(String),

    #[error("passphrase required for key file '{0}'")]
    DecryptionRequired(String),

    #[error("failed to decrypt key file '{path}': {reason}")]
    DecryptionFailed { path: String, reason: String },

    #[error("unsupported key encryption cipher '{0}'")]
    UnsupportedCipher(String),

    #[error("failed to parse key file '{path}': {reason}")]
    ParseError { path: String, reason: String },

    #[error("cannot read '{path}': {source}")]
    KeyFile {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("host key for '{host}' does not match the known hosts entry")]
    HostKeyMismatch { host: String },

    #[error("host '{0}' is not in the known hosts store")]
    HostUnknown(String),

    #[error("host key for '{0}' has been revoked")]
    HostKeyRevoked(String),

    #[error("remote host offered an unreadable public key: {0}")]
    InvalidHostKey(String),

    #[error("no usable credential for {user}@{host}")]
    NoCredential { user: String, host: String },

    #[error("signing with key {index} failed: {reason}")]
    SigningFailed { index: usize, reason: String },
}

/// Top-level error surfaced by every public transfer entry point.
#[derive(Debug, Error)]
pub enum ScpError {
    /// Bad target syntax, missing arguments, unsupported direction.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Malformed frame, unexpected command byte, bad mode or size field.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Message sent by the peer in a `0x01`/`0x02` frame, passed through verbatim.
    #[error("{0}")]
    Remote(String),

    /// Failure reported by the transport collaborator (exec, exit status).
    #[error("transport error: {0}")]
    Transport(String),
}

impl ScpError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        ScpError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        ScpError::Protocol(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        ScpError::Config(message.into())
    }

    /// Higher is more specific. Used to pick which of two concurrent
    /// failures is shown to the user.
    pub fn specificity(&self) -> u8 {
        match self {
            ScpError::Remote(_) => 3,
            ScpError::Protocol(_) | ScpError::Auth(_) | ScpError::Config(_) => 2,
            ScpError::Io { .. } => 1,
            ScpError::Transport(_) => 0,
        }
    }

    /// Keep whichever of `self` and `other` is more specific; ties keep `self`.
    pub fn most_specific(self, other: ScpError) -> ScpError {
        if other.specificity() > self.specificity() {
            other
        } else {
            self
        }
    }
}

impl From<ScpError> for String {
    fn from(e: ScpError) -> String {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_message_is_verbatim() {
        let err = ScpError::Remote("scp: /etc/shadow: Permission denied".into());
        assert_eq!(err.to_string(), "scp: /etc/shadow: Permission denied");
    }

    #[test]
    fn test_remote_beats_protocol_and_transport() {
        let remote = ScpError::Remote("no such file".into());
        let transport = ScpError::Transport("exit status 1".into());
        let picked = transport.most_specific(remote);
        assert!(matches!(picked, ScpError::Remote(_)));

        let protocol = ScpError::protocol("bad size");
        let picked = protocol.most_specific(ScpError::Transport("exit status 1".into()));
        assert!(matches!(picked, ScpError::Protocol(_)));
    }

    #[test]
    fn test_auth_error_converts() {
        let err: ScpError = AuthError::HostUnknown("example.com".into()).into();
        assert!(matches!(err, ScpError::Auth(AuthError::HostUnknown(_))));
        let msg: String = err.into();
        assert!(msg.contains("example.com"));
    }

    #[test]
    fn test_io_error_keeps_context() {
        let err = ScpError::io(
            "cannot create '/tmp/x'",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "cannot create '/tmp/x': denied");
    }
}
