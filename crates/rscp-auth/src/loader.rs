// ── Credential loader ────────────────────────────────────────────────────────
//
// Decodes one PEM block into a `Signer`. Supported block types:
//   • `RSA PRIVATE KEY` (PKCS#1 DER)
//   • `EC PRIVATE KEY`  (SEC1 DER, NIST P-256 / P-384)
// Either may carry legacy OpenSSL encryption headers
// (`Proc-Type: 4,ENCRYPTED` + `DEK-Info: AES-xxx-CBC,<hex iv>`).

use crate::prompt::PassphraseProvider;
use crate::signer::Signer;
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use log::debug;
use md5::{Digest, Md5};
use rscp_core::AuthError;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::RsaPrivateKey;
use secrecy::ExposeSecret;
use std::path::Path;
use std::sync::Arc;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

#[derive(Clone, Default)]
pub struct CredentialLoader {
    passphrase: Option<Arc<dyn PassphraseProvider>>,
}

impl CredentialLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_passphrase_provider(mut self, provider: Arc<dyn PassphraseProvider>) -> Self {
        self.passphrase = Some(provider);
        self
    }

    pub fn load_from_file(&self, path: &Path) -> Result<Signer, AuthError> {
        let bytes = std::fs::read(path).map_err(|e| AuthError::KeyFile {
            path: path.display().to_string(),
            source: e,
        })?;
        self.load_from_pem(&bytes, path)
    }

    /// Decode PEM bytes; `path` is used for error messages and passed to the
    /// passphrase provider.
    pub fn load_from_pem(&self, bytes: &[u8], path: &Path) -> Result<Signer, AuthError> {
        let display = path.display().to_string();
        let block = pem::parse(bytes).map_err(|_| AuthError::NoKeyFound(display.clone()))?;

        let kind = match block.tag() {
            "RSA PRIVATE KEY" => KeyKind::Rsa,
            "EC PRIVATE KEY" => KeyKind::Ec,
            other => return Err(AuthError::UnsupportedKeyType(other.to_string())),
        };

        let encrypted = block
            .headers()
            .get("Proc-Type")
            .map_or(false, |v| v.contains("ENCRYPTED"));

        if !encrypted {
            return parse_der(kind, block.contents()).map_err(|reason| AuthError::ParseError {
                path: display,
                reason,
            });
        }

        let dek_info = block
            .headers()
            .get("DEK-Info")
            .ok_or_else(|| AuthError::ParseError {
                path: display.clone(),
                reason: "encrypted key without DEK-Info header".into(),
            })?;

        let passphrase = self
            .passphrase
            .as_ref()
            .and_then(|p| p.passphrase(path))
            .ok_or_else(|| AuthError::DecryptionRequired(display.clone()))?;

        debug!("decrypting key file '{}' ({})", display, dek_info);
        let der = decrypt_legacy_pem(
            block.contents(),
            dek_info,
            passphrase.expose_secret().as_bytes(),
        )
        .map_err(|e| match e {
            DecryptError::Cipher(name) => AuthError::UnsupportedCipher(name),
            DecryptError::Failed(reason) => AuthError::DecryptionFailed {
                path: display.clone(),
                reason,
            },
        })?;

        // Padding that happens to check out under a wrong passphrase still
        // yields garbage DER.
        parse_der(kind, &der).map_err(|reason| AuthError::DecryptionFailed {
            path: display,
            reason,
        })
    }
}

impl std::fmt::Debug for CredentialLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialLoader")
            .field("has_passphrase_provider", &self.passphrase.is_some())
            .finish()
    }
}

#[derive(Clone, Copy)]
enum KeyKind {
    Rsa,
    Ec,
}

fn parse_der(kind: KeyKind, der: &[u8]) -> Result<Signer, String> {
    match kind {
        KeyKind::Rsa => {
            let key = RsaPrivateKey::from_pkcs1_der(der).map_err(|e| e.to_string())?;
            Signer::from_rsa(key).map_err(|e| e.to_string())
        }
        KeyKind::Ec => {
            if let Ok(key) = p256::SecretKey::from_sec1_der(der) {
                return Signer::from_p256(key).map_err(|e| e.to_string());
            }
            let key = p384::SecretKey::from_sec1_der(der)
                .map_err(|_| "not a NIST P-256 or P-384 SEC1 key".to_string())?;
            Signer::from_p384(key).map_err(|e| e.to_string())
        }
    }
}

// ── Legacy OpenSSL PEM encryption ────────────────────────────────────────────

enum DecryptError {
    Cipher(String),
    Failed(String),
}

fn decrypt_legacy_pem(
    ciphertext: &[u8],
    dek_info: &str,
    passphrase: &[u8],
) -> Result<Vec<u8>, DecryptError> {
    let (cipher, iv_hex) = dek_info
        .split_once(',')
        .ok_or_else(|| DecryptError::Failed(format!("malformed DEK-Info '{}'", dek_info)))?;
    let key_len = match cipher.trim() {
        "AES-128-CBC" => 16,
        "AES-192-CBC" => 24,
        "AES-256-CBC" => 32,
        other => return Err(DecryptError::Cipher(other.to_string())),
    };

    let iv = hex::decode(iv_hex.trim())
        .map_err(|e| DecryptError::Failed(format!("bad IV: {}", e)))?;
    if iv.len() != 16 {
        return Err(DecryptError::Failed(format!(
            "IV must be 16 bytes, got {}",
            iv.len()
        )));
    }
    let key = evp_bytes_to_key(passphrase, &iv[..8], key_len);

    let invalid = |e: aes::cipher::InvalidLength| DecryptError::Failed(e.to_string());
    let result = match key_len {
        16 => Aes128CbcDec::new_from_slices(&key, &iv)
            .map_err(invalid)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        24 => Aes192CbcDec::new_from_slices(&key, &iv)
            .map_err(invalid)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        _ => Aes256CbcDec::new_from_slices(&key, &iv)
            .map_err(invalid)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
    };
    result.map_err(|_| DecryptError::Failed("bad passphrase or corrupt key".into()))
}

/// OpenSSL `EVP_BytesToKey` with MD5 and a single iteration.
fn evp_bytes_to_key(passphrase: &[u8], salt: &[u8], key_len: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(key_len + 16);
    let mut prev: Vec<u8> = Vec::new();
    while key.len() < key_len {
        let mut hasher = Md5::new();
        hasher.update(&prev);
        hasher.update(passphrase);
        hasher.update(salt);
        prev = hasher.finalize().to_vec();
        key.extend_from_slice(&prev);
    }
    key.truncate(key_len);
    key
}
