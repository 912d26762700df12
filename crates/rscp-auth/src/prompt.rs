// ── Secret collaborators ─────────────────────────────────────────────────────
//
// Password and passphrase acquisition is injected; the core never prompts on
// its own and keeps no process-wide prompt state.

use secrecy::SecretString;
use std::path::Path;

/// Supplies a login password for `user@host`. `None` means "no password
/// available", which the caller treats as one fewer credential.
pub trait PasswordProvider: Send + Sync {
    fn password(&self, user: &str, host: &str) -> Option<SecretString>;
}

/// Supplies the passphrase for an encrypted private key file.
pub trait PassphraseProvider: Send + Sync {
    fn passphrase(&self, key_path: &Path) -> Option<SecretString>;
}

/// A fixed secret, answered for every request.
pub struct StaticSecret {
    secret: SecretString,
}

impl StaticSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        StaticSecret {
            secret: SecretString::new(secret.into()),
        }
    }
}

impl PasswordProvider for StaticSecret {
    fn password(&self, _user: &str, _host: &str) -> Option<SecretString> {
        Some(self.secret.clone())
    }
}

impl PassphraseProvider for StaticSecret {
    fn passphrase(&self, _key_path: &Path) -> Option<SecretString> {
        Some(self.secret.clone())
    }
}

impl std::fmt::Debug for StaticSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticSecret([REDACTED])")
    }
}
