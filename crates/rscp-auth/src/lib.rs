//! # rscp – Authentication
//!
//! Everything the transport needs to authenticate both ends of a connection:
//!   • OpenSSH `known_hosts` trust store with hashed-host support
//!   • Host key check policies (`KnownHostsVerifier`, `AcceptAnyHostKey`)
//!   • PEM private key loading (RSA / EC, legacy AES-CBC encryption)
//!   • Ordered `Keyring` of signers exposed by position
//!   • Injected password / passphrase collaborators

pub mod keyring;
pub mod known_hosts;
pub mod loader;
pub mod prompt;
pub mod signer;

pub use keyring::{default_id_files, Keyring};
pub use known_hosts::{AcceptAnyHostKey, HostKeyCheck, KnownHostsVerifier, TrustStore};
pub use loader::CredentialLoader;
pub use prompt::{PassphraseProvider, PasswordProvider, StaticSecret};
pub use signer::Signer;
