// ── Keyring ──────────────────────────────────────────────────────────────────
//
// Ordered signers exposed to the authentication layer by position. An index
// past the end answers `None`: that is how the caller learns there are no
// more identities to offer.

use crate::loader::CredentialLoader;
use crate::signer::Signer;
use log::{debug, info, warn};
use rscp_core::AuthError;
use std::path::{Path, PathBuf};

const DEFAULT_ID_FILES: &[&str] = &["id_ecdsa", "id_rsa"];

/// Conventional identity files under `~/.ssh`, in the order they are tried.
pub fn default_id_files() -> Vec<PathBuf> {
    match dirs::home_dir() {
        Some(home) => DEFAULT_ID_FILES
            .iter()
            .map(|name| home.join(".ssh").join(name))
            .collect(),
        None => Vec::new(),
    }
}

#[derive(Debug, Default)]
pub struct Keyring {
    signers: Vec<Signer>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, signer: Signer) {
        self.signers.push(signer);
    }

    pub fn len(&self) -> usize {
        self.signers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }

    pub fn signers(&self) -> impl Iterator<Item = &Signer> {
        self.signers.iter()
    }

    /// Wire-format public key of the `index`th signer.
    pub fn public_key(&self, index: usize) -> Option<&[u8]> {
        self.signers.get(index).map(Signer::public_key)
    }

    /// Sign `data` with the `index`th signer. `Ok(None)` when out of range.
    pub fn sign(&self, index: usize, data: &[u8]) -> Result<Option<Vec<u8>>, AuthError> {
        let signer = match self.signers.get(index) {
            Some(s) => s,
            None => return Ok(None),
        };
        signer
            .sign(data)
            .map(Some)
            .map_err(|reason| AuthError::SigningFailed { index, reason })
    }

    /// Load each path in order, continuing past failures. One result per path.
    pub fn load_id_files(
        &mut self,
        loader: &CredentialLoader,
        paths: &[PathBuf],
    ) -> Vec<Result<(), AuthError>> {
        paths
            .iter()
            .map(|path| self.load_one(loader, path))
            .collect()
    }

    /// Load whichever default identity files exist; absent ones are skipped
    /// without producing a result.
    pub fn load_default_id_files(&mut self, loader: &CredentialLoader) -> Vec<Result<(), AuthError>> {
        let existing: Vec<PathBuf> = default_id_files()
            .into_iter()
            .filter(|p| {
                let present = p.is_file();
                if !present {
                    debug!("default identity '{}' not present", p.display());
                }
                present
            })
            .collect();
        self.load_id_files(loader, &existing)
    }

    fn load_one(&mut self, loader: &CredentialLoader, path: &Path) -> Result<(), AuthError> {
        match loader.load_from_file(path) {
            Ok(signer) => {
                info!(
                    "loaded {} key {} from '{}'",
                    signer.algorithm(),
                    signer.fingerprint(),
                    path.display()
                );
                self.signers.push(signer);
                Ok(())
            }
            Err(e) => {
                warn!("skipping identity '{}': {}", path.display(), e);
                Err(e)
            }
        }
    }
}
