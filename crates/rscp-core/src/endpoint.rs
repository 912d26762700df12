// ── Transfer endpoint: `[[user@]host:]path` ──────────────────────────────────

use crate::error::ScpError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// One side of a copy. Remote iff `host` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferEndpoint {
    pub host: Option<String>,
    pub user: Option<String>,
    pub path: String,
}

impl TransferEndpoint {
    pub fn local(path: impl Into<String>) -> Self {
        TransferEndpoint {
            host: None,
            user: None,
            path: path.into(),
        }
    }

    /// Parse a positional target argument.
    ///
    /// * no colon, or a slash before the first colon → local path
    /// * `C:` drive-letter prefix → local path
    /// * `[::1]:path`, `user@[fe80::1]:path` → bracketed IPv6 host
    pub fn parse(target: &str) -> Result<Self, ScpError> {
        if target.is_empty() {
            return Err(ScpError::config("empty target"));
        }

        let colon = match remote_colon(target) {
            Some(i) => i,
            None => return Ok(Self::local(target)),
        };

        let user_host = &target[..colon];
        let path = &target[colon + 1..];

        let (user, host) = match user_host.rsplit_once('@') {
            Some((user, host)) => (Some(user), host),
            None => (None, user_host),
        };

        if user == Some("") {
            return Err(ScpError::config(format!("empty user name in target '{}'", target)));
        }

        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(ScpError::config(format!("missing host in target '{}'", target)));
        }

        Ok(TransferEndpoint {
            host: Some(host.to_string()),
            user: user.map(str::to_string),
            path: path.to_string(),
        })
    }

    pub fn is_remote(&self) -> bool {
        self.host.is_some()
    }

    /// Path handed to the remote program; an empty path means the login
    /// directory.
    pub fn remote_path(&self) -> &str {
        if self.path.is_empty() {
            "."
        } else {
            &self.path
        }
    }

    pub fn local_path(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }
}

impl fmt::Display for TransferEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.user, &self.host) {
            (Some(user), Some(host)) => write!(f, "{}@{}:{}", user, host, self.path),
            (None, Some(host)) => write!(f, "{}:{}", host, self.path),
            _ => write!(f, "{}", self.path),
        }
    }
}

fn remote_colon(target: &str) -> Option<usize> {
    let bytes = target.as_bytes();

    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return None;
    }

    let mut in_brackets = false;
    for (i, b) in bytes.iter().enumerate() {
        match b {
            b'[' if i == 0 || bytes[i - 1] == b'@' => in_brackets = true,
            b']' if in_brackets => in_brackets = false,
            b':' if !in_brackets => return Some(i),
            b'/' if !in_brackets => return None,
            _ => {}
        }
    }
    None
}
