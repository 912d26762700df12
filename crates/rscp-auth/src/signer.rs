// ── Signer: one loaded private key ───────────────────────────────────────────

use p256::ecdsa::signature::Signer as _;
use rsa::pkcs1v15::SigningKey as RsaSigningKey;
use rsa::signature::{SignatureEncoding, Signer as _};
use rsa::RsaPrivateKey;
use sha2::Sha256;
use ssh_key::public::{EcdsaPublicKey, KeyData, RsaPublicKey};
use ssh_key::{Algorithm, HashAlg, PublicKey, Signature};
use std::fmt;

enum KeyMaterial {
    Rsa(RsaPrivateKey),
    EcdsaP256(p256::SecretKey),
    EcdsaP384(p384::SecretKey),
}

/// Private key material plus its SSH wire-format public key.
///
/// Signatures are SSH signature blobs (`string algorithm, string signature`)
/// ready to be placed in a `publickey` userauth request.
pub struct Signer {
    key: KeyMaterial,
    public: PublicKey,
    public_blob: Vec<u8>,
}

impl Signer {
    pub fn from_rsa(key: RsaPrivateKey) -> Result<Self, ssh_key::Error> {
        let public = RsaPublicKey::try_from(&key.to_public_key())?;
        Self::new(KeyMaterial::Rsa(key), KeyData::Rsa(public))
    }

    pub fn from_p256(key: p256::SecretKey) -> Result<Self, ssh_key::Error> {
        let signing = p256::ecdsa::SigningKey::from(&key);
        let public = EcdsaPublicKey::from(signing.verifying_key());
        Self::new(KeyMaterial::EcdsaP256(key), KeyData::Ecdsa(public))
    }

    pub fn from_p384(key: p384::SecretKey) -> Result<Self, ssh_key::Error> {
        let signing = p384::ecdsa::SigningKey::from(&key);
        let public = EcdsaPublicKey::from(signing.verifying_key());
        Self::new(KeyMaterial::EcdsaP384(key), KeyData::Ecdsa(public))
    }

    fn new(key: KeyMaterial, key_data: KeyData) -> Result<Self, ssh_key::Error> {
        let public = PublicKey::from(key_data);
        let public_blob = public.to_bytes()?;
        Ok(Signer {
            key,
            public,
            public_blob,
        })
    }

    /// SSH key type name of the public key.
    pub fn algorithm(&self) -> &'static str {
        match self.key {
            KeyMaterial::Rsa(_) => "ssh-rsa",
            KeyMaterial::EcdsaP256(_) => "ecdsa-sha2-nistp256",
            KeyMaterial::EcdsaP384(_) => "ecdsa-sha2-nistp384",
        }
    }

    /// Algorithm name carried inside produced signatures. RSA signs with
    /// SHA-256 rather than the legacy SHA-1 `ssh-rsa` scheme.
    pub fn signature_algorithm(&self) -> &'static str {
        match self.key {
            KeyMaterial::Rsa(_) => "rsa-sha2-256",
            _ => self.algorithm(),
        }
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_blob
    }

    /// `SHA256:<unpadded base64>` as printed by `ssh-keygen -l`.
    pub fn fingerprint(&self) -> String {
        self.public.fingerprint(HashAlg::Sha256).to_string()
    }

    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, String> {
        let signature = match &self.key {
            KeyMaterial::Rsa(key) => {
                let signing_key = RsaSigningKey::<Sha256>::new(key.clone());
                let raw = signing_key.try_sign(data).map_err(|e| e.to_string())?;
                Signature::new(
                    Algorithm::Rsa {
                        hash: Some(HashAlg::Sha256),
                    },
                    raw.to_vec(),
                )
            }
            KeyMaterial::EcdsaP256(key) => {
                let signing_key = p256::ecdsa::SigningKey::from(key);
                let sig: p256::ecdsa::Signature =
                    signing_key.try_sign(data).map_err(|e| e.to_string())?;
                Signature::try_from(sig)
            }
            KeyMaterial::EcdsaP384(key) => {
                let signing_key = p384::ecdsa::SigningKey::from(key);
                let sig: p384::ecdsa::Signature =
                    signing_key.try_sign(data).map_err(|e| e.to_string())?;
                Signature::try_from(sig)
            }
        }
        .map_err(|e| e.to_string())?;

        Vec::<u8>::try_from(signature).map_err(|e| e.to_string())
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("algorithm", &self.algorithm())
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}
